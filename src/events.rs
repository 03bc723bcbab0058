//! Typed broadcast channel for dispatch state-change notifications.
//!
//! UI and notification consumers subscribe to this stream instead of
//! hooking into mutation call sites.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::metrics::MetricsSnapshot;

/// Everything external consumers can observe about the dispatch core.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    LoadCreated {
        load_id: String,
    },
    LoadOffered {
        load_id: String,
        capacity_id: String,
        score: f64,
        expires_at: DateTime<Utc>,
    },
    LoadAccepted {
        load_id: String,
        capacity_id: String,
    },
    LoadDeclined {
        load_id: String,
        capacity_id: String,
    },
    OfferExpired {
        load_id: String,
        capacity_id: String,
    },
    BidRecommended {
        posting_id: String,
        amount: Decimal,
        confidence: u8,
    },
    BidSubmitted {
        posting_id: String,
        amount: Decimal,
    },
    BidResult {
        posting_id: String,
        accepted: bool,
        final_rate: Option<Decimal>,
    },
    MetricsUpdated(MetricsSnapshot),
}

impl DispatchEvent {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchEvent::LoadCreated { .. } => "load_created",
            DispatchEvent::LoadOffered { .. } => "load_offered",
            DispatchEvent::LoadAccepted { .. } => "load_accepted",
            DispatchEvent::LoadDeclined { .. } => "load_declined",
            DispatchEvent::OfferExpired { .. } => "offer_expired",
            DispatchEvent::BidRecommended { .. } => "bid_recommended",
            DispatchEvent::BidSubmitted { .. } => "bid_submitted",
            DispatchEvent::BidResult { .. } => "bid_result",
            DispatchEvent::MetricsUpdated(_) => "metrics_updated",
        }
    }
}

/// Broadcast wrapper; publishing with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: DispatchEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.publish(DispatchEvent::LoadCreated {
            load_id: "l1".to_string(),
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(DispatchEvent::LoadAccepted {
            load_id: "l1".to_string(),
            capacity_id: "u1".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "load_accepted");
    }
}
