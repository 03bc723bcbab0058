//! Offer negotiation: the time-bounded accept/decline/expire protocol.
//!
//! Deadlines live in one deadline-ordered heap drained by a periodic
//! sweep. Accepting or declining does not remove the heap entry; the
//! entry simply loses the compare-and-set when it comes due, so
//! cancellation is a no-op by construction.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::{DispatchEvent, EventBus};
use crate::metrics::MetricsTracker;
use crate::models::{CapacityStatus, CapacityUnit, Load};
use crate::registry::{FleetRegistry, LoadRegistry, OfferResolution};

use super::MatchQueue;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ExpiryEntry {
    deadline: DateTime<Utc>,
    load_id: String,
    capacity_id: String,
}

/// Runs the offer protocol against both registries.
#[derive(Clone)]
pub struct OfferManager {
    fleet: FleetRegistry,
    loads: LoadRegistry,
    queue: MatchQueue,
    events: EventBus,
    metrics: MetricsTracker,
    ttl: Duration,
    deadlines: Arc<Mutex<BinaryHeap<Reverse<ExpiryEntry>>>>,
}

impl OfferManager {
    pub fn new(
        fleet: FleetRegistry,
        loads: LoadRegistry,
        queue: MatchQueue,
        events: EventBus,
        metrics: MetricsTracker,
        ttl: Duration,
    ) -> Self {
        Self {
            fleet,
            loads,
            queue,
            events,
            metrics,
            ttl,
            deadlines: Arc::new(Mutex::new(BinaryHeap::new())),
        }
    }

    /// Extend an offer to the winning unit.
    ///
    /// Both sides are re-validated with compare-and-set transitions: the
    /// capacity moves Available -> Negotiating first, and is rolled back
    /// if the load has moved on since the matching snapshot.
    pub async fn open_offer(
        &self,
        load: &Load,
        unit: &CapacityUnit,
        score: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.fleet
            .transition_from(&unit.id, CapacityStatus::Available, CapacityStatus::Negotiating)
            .await?;

        let deadline = now + self.ttl;
        if let Err(e) = self.loads.begin_offer(&load.id, &unit.id, deadline).await {
            // Load was cancelled or matched elsewhere; release the unit.
            if let Err(rollback) = self
                .fleet
                .transition_from(&unit.id, CapacityStatus::Negotiating, CapacityStatus::Available)
                .await
            {
                error!(capacity_id = %unit.id, error = %rollback, "Failed to roll back negotiation hold");
            }
            return Err(e);
        }

        if let Ok(mut heap) = self.deadlines.lock() {
            heap.push(Reverse(ExpiryEntry {
                deadline,
                load_id: load.id.clone(),
                capacity_id: unit.id.clone(),
            }));
        }

        self.metrics.record_offer_extended(&load.id);
        self.events.publish(DispatchEvent::LoadOffered {
            load_id: load.id.clone(),
            capacity_id: unit.id.clone(),
            score,
            expires_at: deadline,
        });

        info!(
            load_id = %load.id,
            capacity_id = %unit.id,
            score = score,
            expires_at = %deadline,
            "Offer extended"
        );
        Ok(())
    }

    /// Accept an outstanding offer. Returns `Ok(false)` when the offer
    /// was already resolved or has lapsed.
    pub async fn accept(
        &self,
        load_id: &str,
        capacity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let won = self
            .loads
            .resolve_offer(load_id, capacity_id, OfferResolution::Accept, now)
            .await?;
        if !won {
            debug!(load_id = %load_id, capacity_id = %capacity_id, "Accept was a no-op");
            return Ok(false);
        }

        self.fleet
            .transition_from(capacity_id, CapacityStatus::Negotiating, CapacityStatus::Assigned)
            .await?;

        self.metrics.record_offer_accepted(load_id);
        self.events.publish(DispatchEvent::LoadAccepted {
            load_id: load_id.to_string(),
            capacity_id: capacity_id.to_string(),
        });

        info!(load_id = %load_id, capacity_id = %capacity_id, "Offer accepted");
        Ok(true)
    }

    /// Decline an outstanding offer, releasing both sides and requeueing
    /// the load at the head of the match queue. Idempotent: a second
    /// decline is a no-op returning `false`.
    pub async fn decline(
        &self,
        load_id: &str,
        capacity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let won = self
            .loads
            .resolve_offer(load_id, capacity_id, OfferResolution::Decline, now)
            .await?;
        if !won {
            debug!(load_id = %load_id, capacity_id = %capacity_id, "Decline was a no-op");
            return Ok(false);
        }

        self.release_capacity(capacity_id).await;
        self.queue.push_front(load_id.to_string());

        self.metrics.record_offer_declined(load_id);
        self.events.publish(DispatchEvent::LoadDeclined {
            load_id: load_id.to_string(),
            capacity_id: capacity_id.to_string(),
        });

        info!(load_id = %load_id, capacity_id = %capacity_id, "Offer declined");
        Ok(true)
    }

    /// Release every offer whose deadline has lapsed at `now`. Both
    /// sides are released by the compare-and-set winner only, so a
    /// capacity unit is never double-released. Returns how many offers
    /// expired.
    pub async fn sweep_due(&self, now: DateTime<Utc>) -> usize {
        let mut expired = 0;

        loop {
            let entry = {
                let Ok(mut heap) = self.deadlines.lock() else {
                    break;
                };
                match heap.peek() {
                    Some(Reverse(e)) if e.deadline <= now => heap.pop().map(|Reverse(e)| e),
                    _ => None,
                }
            };
            let Some(entry) = entry else { break };

            match self
                .loads
                .resolve_offer(
                    &entry.load_id,
                    &entry.capacity_id,
                    OfferResolution::Expire,
                    now,
                )
                .await
            {
                Ok(true) => {
                    self.release_capacity(&entry.capacity_id).await;
                    self.queue.push_front(entry.load_id.clone());

                    self.metrics.record_offer_expired(&entry.load_id);
                    self.events.publish(DispatchEvent::OfferExpired {
                        load_id: entry.load_id.clone(),
                        capacity_id: entry.capacity_id.clone(),
                    });

                    info!(load_id = %entry.load_id, capacity_id = %entry.capacity_id, "Offer expired");
                    expired += 1;
                }
                // Already accepted or declined; the entry is stale.
                Ok(false) => {}
                Err(e) => {
                    warn!(load_id = %entry.load_id, error = %e, "Failed to expire offer");
                }
            }
        }

        expired
    }

    /// Number of deadlines still tracked (stale entries included).
    pub fn tracked_deadlines(&self) -> usize {
        self.deadlines.lock().map(|h| h.len()).unwrap_or(0)
    }

    async fn release_capacity(&self, capacity_id: &str) {
        if let Err(e) = self
            .fleet
            .transition_from(capacity_id, CapacityStatus::Negotiating, CapacityStatus::Available)
            .await
        {
            // The unit may have gone through a manual transition; the
            // load side is already released, so just record it.
            warn!(capacity_id = %capacity_id, error = %e, "Capacity release skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::models::{
        EquipmentClass, GeoPoint, LoadSpec, LoadStatus, TimeWindow, UrgencyTier,
    };
    use rust_decimal_macros::dec;

    struct Env {
        fleet: FleetRegistry,
        loads: LoadRegistry,
        queue: MatchQueue,
        events: EventBus,
        offers: OfferManager,
    }

    fn make_env(ttl: Duration) -> Env {
        let fleet = FleetRegistry::new();
        let loads = LoadRegistry::new();
        let queue = MatchQueue::new();
        let events = EventBus::default();
        let metrics = MetricsTracker::new();
        let offers = OfferManager::new(
            fleet.clone(),
            loads.clone(),
            queue.clone(),
            events.clone(),
            metrics,
            ttl,
        );
        Env {
            fleet,
            loads,
            queue,
            events,
            offers,
        }
    }

    async fn seed_unit(env: &Env, id: &str) -> CapacityUnit {
        let unit = CapacityUnit::new(
            id.to_string(),
            GeoPoint::new(41.8781, -87.6298),
            EquipmentClass::DryVan,
        );
        env.fleet.register(unit.clone()).await.unwrap();
        env.fleet.set_available(id).await.unwrap();
        env.fleet.get(id).await.unwrap()
    }

    async fn seed_load(env: &Env) -> Load {
        let now = Utc::now();
        let spec = LoadSpec {
            origin: GeoPoint::new(41.8781, -87.6298),
            destination: GeoPoint::new(39.7684, -86.1581),
            pickup_window: TimeWindow::new(now, now + Duration::hours(4)),
            delivery_window: TimeWindow::new(now + Duration::hours(6), now + Duration::hours(18)),
            weight_lbs: 20_000.0,
            equipment: EquipmentClass::DryVan,
            urgency: UrgencyTier::Medium,
            special_requirements: vec![],
            base_rate: dec!(800),
        };
        env.loads.submit(spec, dec!(800)).await.unwrap()
    }

    #[tokio::test]
    async fn test_accept_round_trip() {
        let env = make_env(Duration::minutes(5));
        let unit = seed_unit(&env, "u1").await;
        let load = seed_load(&env).await;
        let now = Utc::now();

        env.offers.open_offer(&load, &unit, 80.0, now).await.unwrap();
        assert!(env.offers.accept(&load.id, "u1", now).await.unwrap());

        // Immediately observable, no intermediate state.
        let stored_load = env.loads.get(&load.id).await.unwrap();
        let stored_unit = env.fleet.get("u1").await.unwrap();
        assert_eq!(stored_load.status, LoadStatus::Accepted);
        assert_eq!(stored_unit.status, CapacityStatus::Assigned);
    }

    #[tokio::test]
    async fn test_unit_referenced_by_at_most_one_offer() {
        let env = make_env(Duration::minutes(5));
        let unit = seed_unit(&env, "u1").await;
        let load_a = seed_load(&env).await;
        let load_b = seed_load(&env).await;
        let now = Utc::now();

        env.offers
            .open_offer(&load_a, &unit, 80.0, now)
            .await
            .unwrap();

        // The unit is Negotiating now; a second offer loses the CAS.
        let err = env
            .offers
            .open_offer(&load_b, &unit, 80.0, now)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::StateConflict { .. }));

        let stored_b = env.loads.get(&load_b.id).await.unwrap();
        assert_eq!(stored_b.status, LoadStatus::Pending);
    }

    #[tokio::test]
    async fn test_decline_releases_and_requeues_at_head() {
        let env = make_env(Duration::minutes(5));
        let unit = seed_unit(&env, "u1").await;
        let load = seed_load(&env).await;
        let now = Utc::now();

        env.queue.push_back("older-load".to_string());
        env.offers.open_offer(&load, &unit, 80.0, now).await.unwrap();

        assert!(env.offers.decline(&load.id, "u1", now).await.unwrap());

        let stored_load = env.loads.get(&load.id).await.unwrap();
        let stored_unit = env.fleet.get("u1").await.unwrap();
        assert_eq!(stored_load.status, LoadStatus::Pending);
        assert!(stored_load.assigned_capacity.is_none());
        assert_eq!(stored_unit.status, CapacityStatus::Available);

        // Declined load is retried before older intake.
        assert_eq!(env.queue.drain()[0], load.id);
    }

    #[tokio::test]
    async fn test_decline_is_idempotent() {
        let env = make_env(Duration::minutes(5));
        let unit = seed_unit(&env, "u1").await;
        let load = seed_load(&env).await;
        let now = Utc::now();

        env.offers.open_offer(&load, &unit, 80.0, now).await.unwrap();
        assert!(env.offers.decline(&load.id, "u1", now).await.unwrap());
        assert!(!env.offers.decline(&load.id, "u1", now).await.unwrap());

        // The unit was matched again in the meantime; a stale decline
        // must not yank it back.
        let load_b = seed_load(&env).await;
        let unit = env.fleet.get("u1").await.unwrap();
        env.offers
            .open_offer(&load_b, &unit, 80.0, now)
            .await
            .unwrap();
        assert!(!env.offers.decline(&load.id, "u1", now).await.unwrap());

        let stored_unit = env.fleet.get("u1").await.unwrap();
        assert_eq!(stored_unit.status, CapacityStatus::Negotiating);
    }

    #[tokio::test]
    async fn test_expiry_releases_both_sides_once() {
        let env = make_env(Duration::seconds(1));
        let unit = seed_unit(&env, "u1").await;
        let load = seed_load(&env).await;
        let mut rx = env.events.subscribe();
        let now = Utc::now();

        env.offers.open_offer(&load, &unit, 80.0, now).await.unwrap();

        // Offered loads always carry a live deadline.
        let stored = env.loads.get(&load.id).await.unwrap();
        assert!(stored.offer_expires_at.unwrap() > now);

        // Nothing due yet.
        assert_eq!(env.offers.sweep_due(now).await, 0);

        // One tick past the deadline: both sides flip, exactly once.
        let later = now + Duration::seconds(2);
        assert_eq!(env.offers.sweep_due(later).await, 1);
        assert_eq!(env.offers.sweep_due(later).await, 0);

        let stored_load = env.loads.get(&load.id).await.unwrap();
        let stored_unit = env.fleet.get("u1").await.unwrap();
        assert_eq!(stored_load.status, LoadStatus::Pending);
        assert_eq!(stored_unit.status, CapacityStatus::Available);

        // Exactly one OfferExpired among the published events.
        let mut expired_events = 0;
        while let Ok(event) = rx.try_recv() {
            if event.kind() == "offer_expired" {
                expired_events += 1;
            }
        }
        assert_eq!(expired_events, 1);
        assert_eq!(env.queue.drain(), vec![load.id.clone()]);
    }

    #[tokio::test]
    async fn test_accept_then_sweep_is_noop() {
        let env = make_env(Duration::seconds(1));
        let unit = seed_unit(&env, "u1").await;
        let load = seed_load(&env).await;
        let now = Utc::now();

        env.offers.open_offer(&load, &unit, 80.0, now).await.unwrap();
        assert!(env.offers.accept(&load.id, "u1", now).await.unwrap());

        // The stale deadline entry comes due but loses the CAS.
        let later = now + Duration::seconds(5);
        assert_eq!(env.offers.sweep_due(later).await, 0);

        let stored_load = env.loads.get(&load.id).await.unwrap();
        let stored_unit = env.fleet.get("u1").await.unwrap();
        assert_eq!(stored_load.status, LoadStatus::Accepted);
        assert_eq!(stored_unit.status, CapacityStatus::Assigned);
        assert_eq!(env.offers.tracked_deadlines(), 0);
    }

    #[tokio::test]
    async fn test_expired_accept_loses() {
        let env = make_env(Duration::seconds(1));
        let unit = seed_unit(&env, "u1").await;
        let load = seed_load(&env).await;
        let now = Utc::now();

        env.offers.open_offer(&load, &unit, 80.0, now).await.unwrap();

        // Deadline lapses before the driver answers.
        let later = now + Duration::seconds(2);
        assert!(!env.offers.accept(&load.id, "u1", later).await.unwrap());

        // Sweep still releases cleanly.
        assert_eq!(env.offers.sweep_due(later).await, 1);
        let stored_unit = env.fleet.get("u1").await.unwrap();
        assert_eq!(stored_unit.status, CapacityStatus::Available);
    }
}
