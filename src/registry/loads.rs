//! Load registry: owns load state and the atomic offer lifecycle
//! primitives the negotiation manager builds on.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{DispatchError, Result};
use crate::models::{Load, LoadPosting, LoadSpec, LoadStatus};

/// How an outstanding offer is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferResolution {
    Accept,
    Decline,
    Expire,
}

/// Owned registry service for loads.
///
/// The offer primitives (`begin_offer`, `resolve_offer`) are single
/// write-lock critical sections: accept/decline/expire race on the same
/// load and exactly one wins the compare-and-set; the rest observe a
/// `false` no-op.
#[derive(Clone)]
pub struct LoadRegistry {
    loads: Arc<RwLock<HashMap<String, Load>>>,
}

impl LoadRegistry {
    pub fn new() -> Self {
        Self {
            loads: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate a spec and create a Pending load priced at `rate`.
    /// Malformed input fails before any state is created.
    pub async fn submit(&self, spec: LoadSpec, rate: Decimal) -> Result<Load> {
        spec.validate()?;

        let load = Load::from_spec(spec, rate);
        let mut loads = self.loads.write().await;
        loads.insert(load.id.clone(), load.clone());

        info!(load_id = %load.id, rate = %load.rate, "Load submitted");
        Ok(load)
    }

    /// Import an externally won posting as an Accepted load bound to
    /// the matched capacity.
    pub async fn import_accepted(
        &self,
        posting: &LoadPosting,
        capacity_id: &str,
        rate: Decimal,
    ) -> Result<Load> {
        let mut load = Load {
            id: uuid::Uuid::new_v4().to_string(),
            origin: posting.origin,
            destination: posting.destination,
            pickup_window: posting.pickup_window,
            delivery_window: posting.pickup_window,
            weight_lbs: posting.weight_lbs,
            equipment: posting.equipment,
            urgency: posting.urgency,
            special_requirements: posting.special_requirements.clone(),
            rate,
            status: LoadStatus::Accepted,
            assigned_capacity: Some(capacity_id.to_string()),
            offer_expires_at: None,
            created_at: Utc::now(),
        };
        load.delivery_window.latest = posting.pickup_window.latest + chrono::Duration::hours(48);

        let mut loads = self.loads.write().await;
        loads.insert(load.id.clone(), load.clone());

        info!(load_id = %load.id, posting_id = %posting.id, capacity_id = %capacity_id, "Imported won bid as accepted load");
        Ok(load)
    }

    pub async fn get(&self, id: &str) -> Option<Load> {
        self.loads.read().await.get(id).cloned()
    }

    /// Validated transition to any legal next status.
    pub async fn transition(&self, id: &str, to: LoadStatus) -> Result<()> {
        let mut loads = self.loads.write().await;
        let load = loads
            .get_mut(id)
            .ok_or_else(|| DispatchError::LoadNotFound(id.to_string()))?;

        if !load.status.can_transition_to(to) {
            return Err(DispatchError::StateConflict {
                entity: "load",
                id: id.to_string(),
                from: load.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        debug!(load_id = %id, from = load.status.as_str(), to = to.as_str(), "Load transition");
        load.status = to;
        Ok(())
    }

    /// Cancel a Pending load. Loads mid-offer or under assignment must
    /// be released through the negotiation manager first.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let mut loads = self.loads.write().await;
        let load = loads
            .get_mut(id)
            .ok_or_else(|| DispatchError::LoadNotFound(id.to_string()))?;

        if load.status != LoadStatus::Pending {
            return Err(DispatchError::StateConflict {
                entity: "load",
                id: id.to_string(),
                from: load.status.as_str().to_string(),
                to: LoadStatus::Cancelled.as_str().to_string(),
            });
        }

        load.status = LoadStatus::Cancelled;
        info!(load_id = %id, "Load cancelled");
        Ok(())
    }

    /// CAS Pending -> Offered, binding the capacity and deadline in the
    /// same critical section.
    pub async fn begin_offer(
        &self,
        load_id: &str,
        capacity_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut loads = self.loads.write().await;
        let load = loads
            .get_mut(load_id)
            .ok_or_else(|| DispatchError::LoadNotFound(load_id.to_string()))?;

        if load.status != LoadStatus::Pending {
            return Err(DispatchError::StateConflict {
                entity: "load",
                id: load_id.to_string(),
                from: load.status.as_str().to_string(),
                to: LoadStatus::Offered.as_str().to_string(),
            });
        }

        load.status = LoadStatus::Offered;
        load.assigned_capacity = Some(capacity_id.to_string());
        load.offer_expires_at = Some(expires_at);
        Ok(())
    }

    /// Resolve an outstanding offer. Returns `Ok(true)` for the winner
    /// of the accept/decline/expire race and `Ok(false)` for every
    /// loser; losers must not touch the capacity side.
    ///
    /// Accept additionally requires a live deadline at `now`; expire
    /// requires the deadline to have lapsed.
    pub async fn resolve_offer(
        &self,
        load_id: &str,
        capacity_id: &str,
        resolution: OfferResolution,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut loads = self.loads.write().await;
        let load = loads
            .get_mut(load_id)
            .ok_or_else(|| DispatchError::LoadNotFound(load_id.to_string()))?;

        if load.status != LoadStatus::Offered {
            return Ok(false);
        }
        if load.assigned_capacity.as_deref() != Some(capacity_id) {
            return Ok(false);
        }

        let deadline = load
            .offer_expires_at
            .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC);

        match resolution {
            OfferResolution::Accept => {
                if deadline <= now {
                    // Lapsed; the sweeper owns the release path.
                    return Ok(false);
                }
                load.status = LoadStatus::Accepted;
                load.offer_expires_at = None;
            }
            OfferResolution::Expire => {
                if deadline > now {
                    // Deadline still live; stale sweep entry.
                    return Ok(false);
                }
                load.status = LoadStatus::Pending;
                load.assigned_capacity = None;
                load.offer_expires_at = None;
            }
            OfferResolution::Decline => {
                load.status = LoadStatus::Pending;
                load.assigned_capacity = None;
                load.offer_expires_at = None;
            }
        }

        Ok(true)
    }

    pub async fn mark_in_transit(&self, id: &str) -> Result<()> {
        self.transition(id, LoadStatus::InTransit).await
    }

    pub async fn mark_delivered(&self, id: &str) -> Result<()> {
        self.transition(id, LoadStatus::Delivered).await
    }

    /// Snapshot of all non-terminal loads.
    pub async fn active_loads(&self) -> Vec<Load> {
        let loads = self.loads.read().await;
        loads
            .values()
            .filter(|l| !l.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Snapshot of loads with an outstanding offer.
    pub async fn offered_loads(&self) -> Vec<Load> {
        let loads = self.loads.read().await;
        loads
            .values()
            .filter(|l| l.status == LoadStatus::Offered)
            .cloned()
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        let loads = self.loads.read().await;
        loads
            .values()
            .filter(|l| l.status == LoadStatus::Pending)
            .count()
    }

    /// Per-status load counts:
    /// (pending, offered, accepted, in_transit, delivered, cancelled).
    pub async fn status_counts(&self) -> (usize, usize, usize, usize, usize, usize) {
        let loads = self.loads.read().await;
        let mut counts = (0, 0, 0, 0, 0, 0);
        for load in loads.values() {
            match load.status {
                LoadStatus::Pending => counts.0 += 1,
                LoadStatus::Offered => counts.1 += 1,
                LoadStatus::Accepted => counts.2 += 1,
                LoadStatus::InTransit => counts.3 += 1,
                LoadStatus::Delivered => counts.4 += 1,
                LoadStatus::Cancelled => counts.5 += 1,
            }
        }
        counts
    }
}

impl Default for LoadRegistry {
    fn default() -> Self {
        Self::new()
    }
}
