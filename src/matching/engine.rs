//! Matching engine: pairs pending loads with available capacity each
//! polling cycle.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::MetricsTracker;
use crate::models::LoadStatus;
use crate::registry::{FleetRegistry, LoadRegistry};

use super::{rank_candidates, score_candidate, MatchQueue, OfferManager};

/// What happened to one load during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Offer extended to the winning unit
    Offered,
    /// No eligible unit this cycle; requeued
    NoCapacity,
    /// Load no longer Pending (cancelled or matched elsewhere)
    Skipped,
}

/// Drains the match queue on a fixed interval, scoring candidates from
/// the fleet registry and handing winners to the offer manager.
#[derive(Clone)]
pub struct MatchingEngine {
    fleet: FleetRegistry,
    loads: LoadRegistry,
    offers: OfferManager,
    queue: MatchQueue,
    metrics: MetricsTracker,
}

impl MatchingEngine {
    pub fn new(
        fleet: FleetRegistry,
        loads: LoadRegistry,
        offers: OfferManager,
        queue: MatchQueue,
        metrics: MetricsTracker,
    ) -> Self {
        Self {
            fleet,
            loads,
            offers,
            queue,
            metrics,
        }
    }

    /// Run one matching cycle over a snapshot of the queue.
    ///
    /// Per-load failures are logged and never abort the remaining
    /// queue; unmatched loads return to the tail for the next cycle.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> usize {
        let queued = self.queue.drain();
        if queued.is_empty() {
            return 0;
        }

        debug!(queued = queued.len(), "Matching cycle start");
        let mut offered = 0;

        for load_id in queued {
            match self.try_match(&load_id, now).await {
                Ok(MatchOutcome::Offered) => offered += 1,
                Ok(MatchOutcome::NoCapacity) => {
                    self.metrics.record_no_capacity();
                    self.queue.push_back(load_id);
                }
                Ok(MatchOutcome::Skipped) => {}
                Err(e) => {
                    warn!(load_id = %load_id, error = %e, "Matching failed; requeueing");
                    self.queue.push_back(load_id);
                }
            }
        }

        if offered > 0 {
            info!(offered = offered, "Matching cycle complete");
        }
        offered
    }

    /// Attempt to match one load.
    async fn try_match(&self, load_id: &str, now: DateTime<Utc>) -> Result<MatchOutcome> {
        let Some(load) = self.loads.get(load_id).await else {
            warn!(load_id = %load_id, "Queued load no longer exists");
            return Ok(MatchOutcome::Skipped);
        };
        if load.status != LoadStatus::Pending {
            return Ok(MatchOutcome::Skipped);
        }

        let candidates = self.fleet.query_available(Some(load.equipment)).await;
        if candidates.is_empty() {
            debug!(load_id = %load_id, equipment = load.equipment.as_str(), "No available capacity");
            return Ok(MatchOutcome::NoCapacity);
        }

        let ranked = rank_candidates(
            candidates
                .iter()
                .map(|unit| score_candidate(&load, unit))
                .collect(),
        );
        let best = &ranked[0];
        let Some(winner) = candidates.iter().find(|u| u.id == best.capacity_id).cloned() else {
            return Ok(MatchOutcome::NoCapacity);
        };

        // The winner's own thresholds gate the offer.
        if !winner.accepts_match(best.deadhead_miles, load.rate_per_mile()) {
            debug!(
                load_id = %load_id,
                capacity_id = %winner.id,
                deadhead = best.deadhead_miles,
                "Winner rejected match on preference thresholds"
            );
            return Ok(MatchOutcome::NoCapacity);
        }

        // State may have moved since the snapshot; the offer manager
        // re-validates both sides with CAS transitions.
        match self.offers.open_offer(&load, &winner, best.score, now).await {
            Ok(()) => {
                if winner.preferences.auto_accept {
                    let accepted = self.offers.accept(&load.id, &winner.id, now).await?;
                    debug!(load_id = %load_id, capacity_id = %winner.id, accepted, "Auto-accept");
                }
                Ok(MatchOutcome::Offered)
            }
            Err(e) => {
                debug!(load_id = %load_id, error = %e, "Offer lost validation race");
                Ok(MatchOutcome::NoCapacity)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::models::{
        CapacityStatus, CapacityUnit, EquipmentClass, GeoPoint, LoadSpec, TimeWindow, UrgencyTier,
    };
    use chrono::Duration;
    use rust_decimal_macros::dec;

    struct Env {
        fleet: FleetRegistry,
        loads: LoadRegistry,
        queue: MatchQueue,
        engine: MatchingEngine,
    }

    fn make_env() -> Env {
        let fleet = FleetRegistry::new();
        let loads = LoadRegistry::new();
        let queue = MatchQueue::new();
        let events = EventBus::default();
        let metrics = MetricsTracker::new();
        let offers = OfferManager::new(
            fleet.clone(),
            loads.clone(),
            queue.clone(),
            events,
            metrics.clone(),
            Duration::minutes(5),
        );
        let engine = MatchingEngine::new(
            fleet.clone(),
            loads.clone(),
            offers,
            queue.clone(),
            metrics,
        );
        Env {
            fleet,
            loads,
            queue,
            engine,
        }
    }

    fn origin() -> GeoPoint {
        GeoPoint::new(41.8781, -87.6298)
    }

    fn point_miles_east(from: GeoPoint, miles: f64) -> GeoPoint {
        let miles_per_deg = from.lat.to_radians().cos() * 69.17;
        GeoPoint::new(from.lat, from.lon + miles / miles_per_deg)
    }

    async fn seed_unit(env: &Env, id: &str, location: GeoPoint, equipment: EquipmentClass) {
        let mut unit = CapacityUnit::new(id.to_string(), location, equipment);
        unit.hours_remaining = 10.0;
        unit.preferences.max_deadhead_miles = 500.0;
        unit.preferences.min_rate_per_mile = dec!(0.50);
        env.fleet.register(unit).await.unwrap();
        env.fleet.set_available(id).await.unwrap();
    }

    async fn seed_load(env: &Env, equipment: EquipmentClass) -> String {
        let now = Utc::now();
        let spec = LoadSpec {
            origin: origin(),
            destination: GeoPoint::new(39.7684, -86.1581),
            pickup_window: TimeWindow::new(now, now + Duration::hours(4)),
            delivery_window: TimeWindow::new(now + Duration::hours(6), now + Duration::hours(18)),
            weight_lbs: 20_000.0,
            equipment,
            urgency: UrgencyTier::Medium,
            special_requirements: vec![],
            base_rate: dec!(800),
        };
        let load = env.loads.submit(spec, dec!(800)).await.unwrap();
        env.queue.push_back(load.id.clone());
        load.id
    }

    #[tokio::test]
    async fn test_selects_nearest_of_two_units() {
        let env = make_env();
        seed_unit(&env, "near", point_miles_east(origin(), 10.0), EquipmentClass::DryVan).await;
        seed_unit(&env, "far", point_miles_east(origin(), 300.0), EquipmentClass::DryVan).await;
        let load_id = seed_load(&env, EquipmentClass::DryVan).await;

        assert_eq!(env.engine.run_cycle(Utc::now()).await, 1);

        let load = env.loads.get(&load_id).await.unwrap();
        assert_eq!(load.status, LoadStatus::Offered);
        assert_eq!(load.assigned_capacity.as_deref(), Some("near"));

        let near = env.fleet.get("near").await.unwrap();
        let far = env.fleet.get("far").await.unwrap();
        assert_eq!(near.status, CapacityStatus::Negotiating);
        assert_eq!(far.status, CapacityStatus::Available);
    }

    #[tokio::test]
    async fn test_equipment_mismatch_requeues() {
        let env = make_env();
        seed_unit(&env, "van", origin(), EquipmentClass::DryVan).await;
        let load_id = seed_load(&env, EquipmentClass::Reefer).await;

        assert_eq!(env.engine.run_cycle(Utc::now()).await, 0);

        let load = env.loads.get(&load_id).await.unwrap();
        assert_eq!(load.status, LoadStatus::Pending);
        assert_eq!(env.queue.drain(), vec![load_id]);
    }

    #[tokio::test]
    async fn test_preference_thresholds_block_offer() {
        let env = make_env();
        let mut unit = CapacityUnit::new("picky".to_string(), origin(), EquipmentClass::DryVan);
        unit.preferences.min_rate_per_mile = dec!(50.00);
        env.fleet.register(unit).await.unwrap();
        env.fleet.set_available("picky").await.unwrap();

        let load_id = seed_load(&env, EquipmentClass::DryVan).await;
        assert_eq!(env.engine.run_cycle(Utc::now()).await, 0);

        let load = env.loads.get(&load_id).await.unwrap();
        assert_eq!(load.status, LoadStatus::Pending);
        assert_eq!(env.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_accept_assigns_immediately() {
        let env = make_env();
        let mut unit = CapacityUnit::new("auto".to_string(), origin(), EquipmentClass::DryVan);
        unit.hours_remaining = 10.0;
        unit.preferences.auto_accept = true;
        unit.preferences.min_rate_per_mile = dec!(0.50);
        env.fleet.register(unit).await.unwrap();
        env.fleet.set_available("auto").await.unwrap();

        let load_id = seed_load(&env, EquipmentClass::DryVan).await;
        env.engine.run_cycle(Utc::now()).await;

        let load = env.loads.get(&load_id).await.unwrap();
        let stored = env.fleet.get("auto").await.unwrap();
        assert_eq!(load.status, LoadStatus::Accepted);
        assert_eq!(stored.status, CapacityStatus::Assigned);
    }

    #[tokio::test]
    async fn test_two_loads_one_unit_single_reference() {
        let env = make_env();
        seed_unit(&env, "solo", origin(), EquipmentClass::DryVan).await;
        let load_a = seed_load(&env, EquipmentClass::DryVan).await;
        let load_b = seed_load(&env, EquipmentClass::DryVan).await;

        assert_eq!(env.engine.run_cycle(Utc::now()).await, 1);

        // Only one of the two loads may reference the unit.
        let a = env.loads.get(&load_a).await.unwrap();
        let b = env.loads.get(&load_b).await.unwrap();
        let holders = [&a, &b]
            .iter()
            .filter(|l| l.assigned_capacity.as_deref() == Some("solo"))
            .count();
        assert_eq!(holders, 1);

        // The loser stays queued for the next cycle.
        assert_eq!(env.queue.len(), 1);
    }
}
