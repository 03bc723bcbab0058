//! Confidence scoring for externally posted loads.
//!
//! Terms (0-100 after clamping):
//! - any equipment-compatible Available candidate: base 25 (none: 0, early out)
//! - deadhead within the policy limit: +20, beyond: -10 with a risk note
//! - posting rate clears the cost-plus-margin target: +25, short: -15 with a risk note
//! - urgency: Urgent +15, High +10
//! - pickup window already open: +10
//! - best candidate serves every special requirement: +5, cannot: -20 with a risk note
//!
//! One scoring path serves both feed sources; risk tolerances diverge
//! per source through `BidPolicy`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::metrics::MetricsTracker;
use crate::models::{FeedSource, LoadPosting, UrgencyTier};
use crate::registry::FleetRegistry;

/// Per-feed-source bid risk tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidPolicy {
    /// Longest deadhead to a posting's origin that scores positively
    pub max_deadhead_miles: f64,

    /// Margin over estimated cost the posting rate must clear (0.15 = 15%)
    pub target_margin: Decimal,

    /// Confidence below which a bid is never placed
    pub min_confidence: u8,

    /// Confidence at or above which a bid is submitted without approval
    pub auto_submit_threshold: u8,
}

impl Default for BidPolicy {
    fn default() -> Self {
        Self {
            max_deadhead_miles: 150.0,
            target_margin: dec!(0.15),
            min_confidence: 60,
            auto_submit_threshold: 85,
        }
    }
}

impl BidPolicy {
    /// Trusted partner network: longer deadheads are acceptable and a
    /// thinner margin still clears, so more bids go out unattended.
    pub fn partner() -> Self {
        Self {
            max_deadhead_miles: 200.0,
            target_margin: dec!(0.12),
            min_confidence: 60,
            auto_submit_threshold: 80,
        }
    }

    /// Public marketplace: tighter deadhead, fatter margin, and a
    /// higher bar before bidding without a human in the loop.
    pub fn open_board() -> Self {
        Self {
            max_deadhead_miles: 120.0,
            target_margin: dec!(0.18),
            min_confidence: 60,
            auto_submit_threshold: 90,
        }
    }
}

/// Per-mile and per-hour operating cost constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostModel {
    pub fuel_per_mile: Decimal,
    pub wear_per_mile: Decimal,
    pub labor_per_hour: Decimal,

    /// Average road speed used to turn miles into labor hours
    pub avg_speed_mph: f64,

    /// Overhead applied on top of direct cost (0.15 = 15%)
    pub overhead_pct: Decimal,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            fuel_per_mile: dec!(0.55),
            wear_per_mile: dec!(0.20),
            labor_per_hour: dec!(25.00),
            avg_speed_mph: 50.0,
            overhead_pct: dec!(0.15),
        }
    }
}

impl CostModel {
    /// Estimated cost of running `total_miles` (deadhead + linehaul).
    pub fn estimated_cost(&self, total_miles: f64) -> Decimal {
        if total_miles <= 0.0 {
            return Decimal::ZERO;
        }

        let miles = Decimal::try_from(total_miles).unwrap_or(Decimal::ZERO);
        let hours = Decimal::try_from(total_miles / self.avg_speed_mph).unwrap_or(Decimal::ZERO);

        let direct = (self.fuel_per_mile + self.wear_per_mile) * miles + self.labor_per_hour * hours;
        (direct * (Decimal::ONE + self.overhead_pct)).round_dp(2)
    }
}

/// Latest evaluation of one posting. Superseded on re-evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct BidEvaluation {
    pub posting_id: String,
    pub source: FeedSource,
    pub confidence: u8,
    pub should_bid: bool,
    pub recommended_bid: Decimal,

    /// Nearest compatible unit, if any
    pub best_candidate: Option<String>,

    /// Every compatible Available unit at evaluation time
    pub matched_candidates: Vec<String>,

    pub deadhead_miles: f64,
    pub estimated_cost: Decimal,

    /// (recommended bid - cost) / cost, when a bid is recommended
    pub profit_margin: Decimal,

    pub risk_factors: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl BidEvaluation {
    fn no_candidates(posting: &LoadPosting, now: DateTime<Utc>) -> Self {
        Self {
            posting_id: posting.id.clone(),
            source: posting.source,
            confidence: 0,
            should_bid: false,
            recommended_bid: Decimal::ZERO,
            best_candidate: None,
            matched_candidates: Vec::new(),
            deadhead_miles: 0.0,
            estimated_cost: Decimal::ZERO,
            profit_margin: Decimal::ZERO,
            risk_factors: vec!["no compatible capacity available".to_string()],
            evaluated_at: now,
        }
    }
}

/// Scores postings against current fleet state. Retains only the
/// latest evaluation per posting.
#[derive(Clone)]
pub struct BidEvaluator {
    fleet: FleetRegistry,
    metrics: MetricsTracker,
    cost_model: CostModel,
    partner_policy: BidPolicy,
    open_board_policy: BidPolicy,
    latest: Arc<RwLock<HashMap<String, (LoadPosting, BidEvaluation)>>>,
}

impl BidEvaluator {
    pub fn new(fleet: FleetRegistry, metrics: MetricsTracker, cost_model: CostModel) -> Self {
        Self {
            fleet,
            metrics,
            cost_model,
            partner_policy: BidPolicy::partner(),
            open_board_policy: BidPolicy::open_board(),
            latest: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn policy(&self, source: FeedSource) -> &BidPolicy {
        match source {
            FeedSource::Partner => &self.partner_policy,
            FeedSource::OpenBoard => &self.open_board_policy,
        }
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    /// Score one posting against the current fleet snapshot.
    pub async fn evaluate(&self, posting: &LoadPosting, now: DateTime<Utc>) -> BidEvaluation {
        self.metrics.record_bid_evaluated();
        let policy = self.policy(posting.source).clone();

        let candidates = self.fleet.query_available(Some(posting.equipment)).await;
        if candidates.is_empty() {
            debug!(posting_id = %posting.id, equipment = posting.equipment.as_str(), "No compatible capacity");
            return self.remember(posting, BidEvaluation::no_candidates(posting, now)).await;
        }

        let mut confidence: i32 = 25;
        let mut risk_factors = Vec::new();

        // Nearest unit to the pickup; ties break on id for determinism.
        let scored: Vec<_> = candidates
            .iter()
            .map(|u| (u, u.location.distance_miles(&posting.origin)))
            .collect();
        let Some(&(best, deadhead)) = scored.iter().min_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        }) else {
            return self.remember(posting, BidEvaluation::no_candidates(posting, now)).await;
        };

        if deadhead <= policy.max_deadhead_miles {
            confidence += 20;
        } else {
            confidence -= 10;
            risk_factors.push(format!(
                "deadhead {:.0} mi exceeds {:.0} mi limit",
                deadhead, policy.max_deadhead_miles
            ));
        }

        let total_miles = deadhead + posting.linehaul_miles();
        let estimated_cost = self.cost_model.estimated_cost(total_miles);
        let target = (estimated_cost * (Decimal::ONE + policy.target_margin)).round_dp(2);

        let mut recommended_bid = Decimal::ZERO;
        if posting.max_rate >= target {
            confidence += 25;
            recommended_bid = (target * dec!(1.05)).round_dp(2).min(posting.max_rate);
        } else {
            confidence -= 15;
            risk_factors.push(format!(
                "max rate {} below target {}",
                posting.max_rate, target
            ));
        }

        confidence += match posting.urgency {
            UrgencyTier::Urgent => 15,
            UrgencyTier::High => 10,
            _ => 0,
        };

        if posting.pickup_window.is_open_at(now) {
            confidence += 10;
        }

        if best.can_serve(&posting.special_requirements) {
            confidence += 5;
        } else {
            confidence -= 20;
            risk_factors.push(format!(
                "{} cannot serve: {}",
                best.id,
                posting.special_requirements.join(", ")
            ));
        }

        let confidence = confidence.clamp(0, 100) as u8;
        let should_bid = confidence >= policy.min_confidence && recommended_bid > Decimal::ZERO;

        let profit_margin = if recommended_bid > Decimal::ZERO && estimated_cost > Decimal::ZERO {
            ((recommended_bid - estimated_cost) / estimated_cost).round_dp(4)
        } else {
            Decimal::ZERO
        };

        let mut matched_candidates: Vec<String> =
            candidates.iter().map(|u| u.id.clone()).collect();
        matched_candidates.sort();

        let evaluation = BidEvaluation {
            posting_id: posting.id.clone(),
            source: posting.source,
            confidence,
            should_bid,
            recommended_bid,
            best_candidate: Some(best.id.clone()),
            matched_candidates,
            deadhead_miles: deadhead,
            estimated_cost,
            profit_margin,
            risk_factors,
            evaluated_at: now,
        };

        debug!(
            posting_id = %posting.id,
            confidence = confidence,
            should_bid = should_bid,
            bid = %recommended_bid,
            "Posting evaluated"
        );
        self.remember(posting, evaluation).await
    }

    /// Most recent evaluation of a posting, with the posting itself.
    pub async fn latest(&self, posting_id: &str) -> Option<(LoadPosting, BidEvaluation)> {
        self.latest.read().await.get(posting_id).cloned()
    }

    /// All retained evaluations, newest state only.
    pub async fn recommendations(&self) -> Vec<BidEvaluation> {
        self.latest
            .read()
            .await
            .values()
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Drop a posting after its bid went out.
    pub async fn forget(&self, posting_id: &str) {
        self.latest.write().await.remove(posting_id);
    }

    /// Drop evaluations whose pickup windows have closed. Returns how
    /// many were removed.
    pub async fn prune_stale(&self, now: DateTime<Utc>) -> usize {
        let mut latest = self.latest.write().await;
        let before = latest.len();
        latest.retain(|_, (posting, _)| !posting.is_stale(now));
        before - latest.len()
    }

    async fn remember(&self, posting: &LoadPosting, evaluation: BidEvaluation) -> BidEvaluation {
        self.latest
            .write()
            .await
            .insert(posting.id.clone(), (posting.clone(), evaluation.clone()));
        evaluation
    }
}
