//! Bid submission toward the external gateway.
//!
//! Submission is fire-and-forget: the caller spawns and moves on, and
//! the outcome comes back through the event stream. Transient gateway
//! failures retry with bounded exponential backoff; exhausted retries
//! are dropped and surfaced through the failure counter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::DispatchError;
use crate::events::{DispatchEvent, EventBus};
use crate::feed::{BidGateway, BidOutcome};
use crate::metrics::MetricsTracker;
use crate::models::{CapacityStatus, LoadPosting};
use crate::registry::{FleetRegistry, LoadRegistry};

/// Retry envelope for the gateway call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,

    /// Total time budget before the bid is dropped
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(30),
        }
    }
}

/// Sends bids and imports wins into the load registry.
#[derive(Clone)]
pub struct BidSubmitter {
    gateway: Arc<dyn BidGateway>,
    loads: LoadRegistry,
    fleet: FleetRegistry,
    events: EventBus,
    metrics: MetricsTracker,
    retry: RetryConfig,
}

impl BidSubmitter {
    pub fn new(
        gateway: Arc<dyn BidGateway>,
        loads: LoadRegistry,
        fleet: FleetRegistry,
        events: EventBus,
        metrics: MetricsTracker,
        retry: RetryConfig,
    ) -> Self {
        Self {
            gateway,
            loads,
            fleet,
            events,
            metrics,
            retry,
        }
    }

    /// Fire-and-forget submission. Completion is reported through
    /// `BidSubmitted`/`BidResult` events, never awaited inline.
    pub fn spawn_submit(&self, posting: LoadPosting, capacity_id: String, amount: Decimal) {
        let submitter = self.clone();
        tokio::spawn(async move {
            submitter.submit(posting, capacity_id, amount).await;
        });
    }

    /// Submit one bid and handle the outcome.
    pub async fn submit(&self, posting: LoadPosting, capacity_id: String, amount: Decimal) {
        match self.call_gateway(&posting.id, amount).await {
            Ok(outcome) => {
                self.metrics.record_bid_submitted();
                self.events.publish(DispatchEvent::BidSubmitted {
                    posting_id: posting.id.clone(),
                    amount,
                });

                self.metrics.record_bid_result(outcome.accepted);
                if outcome.accepted {
                    let rate = outcome.final_rate.unwrap_or(amount);
                    self.import_win(&posting, &capacity_id, rate).await;
                }

                info!(
                    posting_id = %posting.id,
                    accepted = outcome.accepted,
                    final_rate = ?outcome.final_rate,
                    "Bid resolved"
                );
                self.events.publish(DispatchEvent::BidResult {
                    posting_id: posting.id.clone(),
                    accepted: outcome.accepted,
                    final_rate: outcome.final_rate,
                });
            }
            Err(e) => {
                self.metrics.record_submission_failure();
                warn!(posting_id = %posting.id, error = %e, "Bid submission dropped");
            }
        }
    }

    async fn call_gateway(
        &self,
        posting_id: &str,
        amount: Decimal,
    ) -> Result<BidOutcome, DispatchError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_interval)
            .with_max_interval(self.retry.max_interval)
            .with_max_elapsed_time(Some(self.retry.max_elapsed))
            .build();

        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let gateway = &self.gateway;

        let result = backoff::future::retry(policy, || async move {
            attempts_ref.fetch_add(1, Ordering::Relaxed);
            gateway
                .submit_bid(posting_id, amount)
                .await
                .map_err(backoff::Error::transient)
        })
        .await;

        result.map_err(|e| DispatchError::ExternalSubmission {
            posting_id: posting_id.to_string(),
            attempts: attempts.load(Ordering::Relaxed),
            reason: e.to_string(),
        })
    }

    /// Import a won posting as an Accepted load on the matched unit.
    ///
    /// The unit may have been matched internally while the bid was in
    /// flight; a won bid never pulls it back, so the win is logged and
    /// skipped when the unit is no longer Available.
    async fn import_win(&self, posting: &LoadPosting, capacity_id: &str, rate: Decimal) {
        if let Err(e) = self
            .fleet
            .transition_from(capacity_id, CapacityStatus::Available, CapacityStatus::Negotiating)
            .await
        {
            warn!(
                posting_id = %posting.id,
                capacity_id = %capacity_id,
                error = %e,
                "Bid won but unit no longer available; import skipped"
            );
            return;
        }
        if let Err(e) = self
            .fleet
            .transition_from(capacity_id, CapacityStatus::Negotiating, CapacityStatus::Assigned)
            .await
        {
            warn!(capacity_id = %capacity_id, error = %e, "Failed to assign unit for won bid");
            return;
        }

        match self.loads.import_accepted(posting, capacity_id, rate).await {
            Ok(load) => {
                self.events.publish(DispatchEvent::LoadAccepted {
                    load_id: load.id,
                    capacity_id: capacity_id.to_string(),
                });
            }
            Err(e) => {
                warn!(posting_id = %posting.id, error = %e, "Failed to import won bid");
            }
        }
    }
}
