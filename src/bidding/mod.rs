//! Evaluation of externally posted loads and bid submission.

mod evaluator;
mod submitter;

pub use evaluator::{BidEvaluation, BidEvaluator, BidPolicy, CostModel};
pub use submitter::{BidSubmitter, RetryConfig};
