//! Matching: candidate scoring, the match cycle, and offer negotiation.

mod engine;
mod offers;
mod scorer;

pub use engine::{MatchOutcome, MatchingEngine};
pub use offers::OfferManager;
pub use scorer::{rank_candidates, score_candidate, MatchScore};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// FIFO queue of load ids awaiting matching.
///
/// Declines and expiries re-enqueue at the head so a released load is
/// retried before fresh intake; unmatched loads go back to the tail.
#[derive(Clone, Default)]
pub struct MatchQueue {
    inner: Arc<Mutex<VecDeque<String>>>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&self, load_id: String) {
        if let Ok(mut q) = self.inner.lock() {
            if !q.contains(&load_id) {
                q.push_back(load_id);
            }
        }
    }

    pub fn push_front(&self, load_id: String) {
        if let Ok(mut q) = self.inner.lock() {
            if !q.contains(&load_id) {
                q.push_front(load_id);
            }
        }
    }

    /// Take the whole queue as a snapshot for one cycle.
    pub fn drain(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
