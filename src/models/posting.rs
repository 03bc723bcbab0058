//! Externally sourced load postings pulled from partner and open-board feeds.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::capacity::EquipmentClass;
use super::geo::GeoPoint;
use super::load::{TimeWindow, UrgencyTier};

/// Which feed a posting came from. Each source carries its own bid
/// risk tolerances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    /// Trusted partner network
    Partner,
    /// Public marketplace board
    OpenBoard,
}

impl FeedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedSource::Partner => "partner",
            FeedSource::OpenBoard => "open_board",
        }
    }
}

impl std::str::FromStr for FeedSource {
    type Err = crate::error::DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "partner" => Ok(FeedSource::Partner),
            "open_board" | "openboard" => Ok(FeedSource::OpenBoard),
            other => Err(crate::error::DispatchError::validation(format!(
                "unknown feed source: {other}"
            ))),
        }
    }
}

/// A load posted by an external party, candidate for bidding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadPosting {
    /// Identifier assigned by the posting board
    pub id: String,

    pub source: FeedSource,

    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub equipment: EquipmentClass,
    pub urgency: UrgencyTier,

    #[serde(default)]
    pub special_requirements: Vec<String>,

    pub weight_lbs: f64,

    /// Highest rate the poster will pay
    pub max_rate: Decimal,

    pub pickup_window: TimeWindow,

    #[serde(default = "Utc::now")]
    pub posted_at: DateTime<Utc>,
}

impl LoadPosting {
    /// Loaded distance from origin to destination, in miles.
    pub fn linehaul_miles(&self) -> f64 {
        self.origin.distance_miles(&self.destination)
    }

    /// A posting is stale once its pickup window has closed.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.pickup_window.latest < now
    }
}
