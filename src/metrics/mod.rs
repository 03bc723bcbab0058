//! Runtime counters and the periodic metrics snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::{FleetRegistry, LoadRegistry};

/// Point-in-time view of dispatch activity, combining live registry
/// counts with lifetime counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,

    // Loads by status
    pub pending_loads: usize,
    pub offered_loads: usize,
    pub accepted_loads: usize,
    pub in_transit_loads: usize,
    pub delivered_loads: usize,
    pub cancelled_loads: usize,

    // Fleet by status
    pub total_units: usize,
    pub available_units: usize,
    pub negotiating_units: usize,
    pub assigned_units: usize,
    pub offline_units: usize,

    /// Share of the fleet currently under load (0.0 to 1.0)
    pub utilization: f64,

    // Offer lifecycle counters
    pub offers_extended: u64,
    pub offers_accepted: u64,
    pub offers_declined: u64,
    pub offers_expired: u64,

    /// Matching cycles that found no eligible capacity for some load
    pub no_capacity_misses: u64,

    // Bidding counters
    pub bids_evaluated: u64,
    pub bids_submitted: u64,
    pub bids_won: u64,
    pub bids_lost: u64,
    pub submission_failures: u64,

    /// Mean seconds from offer extension to accept/decline
    pub avg_offer_response_secs: f64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Metrics ===")?;
        writeln!(
            f,
            "Loads:        {} pending, {} offered, {} accepted, {} in transit, {} delivered",
            self.pending_loads,
            self.offered_loads,
            self.accepted_loads,
            self.in_transit_loads,
            self.delivered_loads
        )?;
        writeln!(
            f,
            "Fleet:        {} units ({} available, {} negotiating, {} assigned, {} offline)",
            self.total_units,
            self.available_units,
            self.negotiating_units,
            self.assigned_units,
            self.offline_units
        )?;
        writeln!(f, "Utilization:  {:.1}%", self.utilization * 100.0)?;
        writeln!(
            f,
            "Offers:       {} extended ({} accepted, {} declined, {} expired)",
            self.offers_extended, self.offers_accepted, self.offers_declined, self.offers_expired
        )?;
        writeln!(
            f,
            "Bids:         {} evaluated, {} submitted ({} won, {} lost, {} failed)",
            self.bids_evaluated,
            self.bids_submitted,
            self.bids_won,
            self.bids_lost,
            self.submission_failures
        )?;
        writeln!(
            f,
            "Avg Response: {:.1}s",
            self.avg_offer_response_secs
        )?;
        Ok(())
    }
}

#[derive(Default)]
struct ResponseTimes {
    sum_secs: f64,
    count: u64,
    open: HashMap<String, Instant>,
}

#[derive(Default)]
struct Counters {
    offers_extended: AtomicU64,
    offers_accepted: AtomicU64,
    offers_declined: AtomicU64,
    offers_expired: AtomicU64,
    no_capacity: AtomicU64,
    bids_evaluated: AtomicU64,
    bids_submitted: AtomicU64,
    bids_won: AtomicU64,
    bids_lost: AtomicU64,
    submission_failures: AtomicU64,
}

/// Shared counter sink; cheap to clone and record from any task.
#[derive(Clone, Default)]
pub struct MetricsTracker {
    counters: Arc<Counters>,
    response: Arc<Mutex<ResponseTimes>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_offer_extended(&self, load_id: &str) {
        self.counters.offers_extended.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut r) = self.response.lock() {
            r.open.insert(load_id.to_string(), Instant::now());
        }
    }

    pub fn record_offer_accepted(&self, load_id: &str) {
        self.counters.offers_accepted.fetch_add(1, Ordering::Relaxed);
        self.close_response(load_id, true);
    }

    pub fn record_offer_declined(&self, load_id: &str) {
        self.counters.offers_declined.fetch_add(1, Ordering::Relaxed);
        self.close_response(load_id, true);
    }

    pub fn record_offer_expired(&self, load_id: &str) {
        self.counters.offers_expired.fetch_add(1, Ordering::Relaxed);
        // An expiry is not a response; drop the open marker only.
        self.close_response(load_id, false);
    }

    pub fn record_no_capacity(&self) {
        self.counters.no_capacity.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bid_evaluated(&self) {
        self.counters.bids_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bid_submitted(&self) {
        self.counters.bids_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bid_result(&self, accepted: bool) {
        if accepted {
            self.counters.bids_won.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.bids_lost.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_submission_failure(&self) {
        self.counters
            .submission_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    fn close_response(&self, load_id: &str, count_elapsed: bool) {
        if let Ok(mut r) = self.response.lock() {
            if let Some(opened) = r.open.remove(load_id) {
                if count_elapsed {
                    r.sum_secs += opened.elapsed().as_secs_f64();
                    r.count += 1;
                }
            }
        }
    }

    /// Assemble a snapshot from the live registries plus counters.
    pub async fn snapshot(&self, fleet: &FleetRegistry, loads: &LoadRegistry) -> MetricsSnapshot {
        let (total_units, available, negotiating, assigned, offline) = fleet.status_counts().await;
        let (pending, offered, accepted, in_transit, delivered, cancelled) =
            loads.status_counts().await;

        let utilization = if total_units > 0 {
            assigned as f64 / total_units as f64
        } else {
            0.0
        };

        let avg_response = {
            match self.response.lock() {
                Ok(r) if r.count > 0 => r.sum_secs / r.count as f64,
                _ => 0.0,
            }
        };

        let c = &self.counters;
        MetricsSnapshot {
            taken_at: Utc::now(),
            pending_loads: pending,
            offered_loads: offered,
            accepted_loads: accepted,
            in_transit_loads: in_transit,
            delivered_loads: delivered,
            cancelled_loads: cancelled,
            total_units,
            available_units: available,
            negotiating_units: negotiating,
            assigned_units: assigned,
            offline_units: offline,
            utilization,
            offers_extended: c.offers_extended.load(Ordering::Relaxed),
            offers_accepted: c.offers_accepted.load(Ordering::Relaxed),
            offers_declined: c.offers_declined.load(Ordering::Relaxed),
            offers_expired: c.offers_expired.load(Ordering::Relaxed),
            no_capacity_misses: c.no_capacity.load(Ordering::Relaxed),
            bids_evaluated: c.bids_evaluated.load(Ordering::Relaxed),
            bids_submitted: c.bids_submitted.load(Ordering::Relaxed),
            bids_won: c.bids_won.load(Ordering::Relaxed),
            bids_lost: c.bids_lost.load(Ordering::Relaxed),
            submission_failures: c.submission_failures.load(Ordering::Relaxed),
            avg_offer_response_secs: avg_response,
        }
    }
}
