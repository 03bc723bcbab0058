//! External collaborator seams: the load feed, the bid gateway, and the
//! notification sink. Core logic only ever talks to these traits, so
//! tests inject fixed in-memory implementations.

mod board_client;
mod types;

pub use board_client::LoadBoardClient;
pub use types::{BidRequest, BidResponse, PostingResponse};

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use crate::models::LoadPosting;

/// Periodic pull of externally posted loads.
#[async_trait]
pub trait LoadFeed: Send + Sync {
    async fn poll_postings(&self) -> Result<Vec<LoadPosting>>;
}

/// Outcome reported by the bid counterparty.
#[derive(Debug, Clone)]
pub struct BidOutcome {
    pub accepted: bool,

    /// Rate the counterparty settled on, when it differs from the bid
    pub final_rate: Option<Decimal>,
}

/// Submits bids toward the posting board.
#[async_trait]
pub trait BidGateway: Send + Sync {
    async fn submit_bid(&self, posting_id: &str, amount: Decimal) -> Result<BidOutcome>;
}

/// Fire-and-forget driver notifications. Implementations must return
/// quickly; slow delivery belongs in a spawned task.
pub trait Notifier: Send + Sync {
    fn notify(&self, capacity_id: &str, message: &str);
}

/// Notifier that writes to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, capacity_id: &str, message: &str) {
        info!(capacity_id = %capacity_id, message = %message, "Notification");
    }
}

/// A no-op notifier for tests or when notifications are disabled.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _capacity_id: &str, _message: &str) {}
}
