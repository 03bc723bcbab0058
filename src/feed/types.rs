//! Wire types for the load board HTTP API.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{FeedSource, GeoPoint, LoadPosting, TimeWindow, UrgencyTier};

/// Posting as returned by the board's /postings endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostingResponse {
    pub id: String,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub destination_lat: f64,
    pub destination_lon: f64,
    pub equipment: String,
    #[serde(default)]
    pub urgency: String,
    #[serde(default)]
    pub special_requirements: Vec<String>,
    #[serde(default)]
    pub weight_lbs: f64,
    pub max_rate: Decimal,

    /// Pickup window bounds as epoch seconds
    pub pickup_earliest: i64,
    pub pickup_latest: i64,

    #[serde(default)]
    pub posted_at: i64,
}

impl PostingResponse {
    /// Convert into the domain posting; unparseable postings are
    /// dropped with a warning rather than failing the whole poll.
    pub fn into_posting(self, source: FeedSource) -> Option<LoadPosting> {
        let equipment = match self.equipment.parse() {
            Ok(e) => e,
            Err(_) => {
                warn!(posting_id = %self.id, equipment = %self.equipment, "Unknown equipment class");
                return None;
            }
        };

        let urgency = if self.urgency.is_empty() {
            UrgencyTier::Medium
        } else {
            match self.urgency.parse() {
                Ok(u) => u,
                Err(_) => {
                    warn!(posting_id = %self.id, urgency = %self.urgency, "Unknown urgency tier");
                    UrgencyTier::Medium
                }
            }
        };

        let earliest = Utc.timestamp_opt(self.pickup_earliest, 0).single()?;
        let latest = Utc.timestamp_opt(self.pickup_latest, 0).single()?;
        let posted_at = if self.posted_at > 0 {
            Utc.timestamp_opt(self.posted_at, 0).single()?
        } else {
            Utc::now()
        };

        Some(LoadPosting {
            id: self.id,
            source,
            origin: GeoPoint::new(self.origin_lat, self.origin_lon),
            destination: GeoPoint::new(self.destination_lat, self.destination_lon),
            equipment,
            urgency,
            special_requirements: self.special_requirements,
            weight_lbs: self.weight_lbs,
            max_rate: self.max_rate,
            pickup_window: TimeWindow::new(earliest, latest),
            posted_at,
        })
    }
}

/// Body for POST /bids.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRequest {
    pub posting_id: String,
    pub amount: Decimal,
}

/// Response from POST /bids.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidResponse {
    pub accepted: bool,
    #[serde(default)]
    pub final_rate: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EquipmentClass;

    fn make_response() -> PostingResponse {
        let now = Utc::now().timestamp();
        PostingResponse {
            id: "post-1".to_string(),
            origin_lat: 41.8781,
            origin_lon: -87.6298,
            destination_lat: 39.7684,
            destination_lon: -86.1581,
            equipment: "reefer".to_string(),
            urgency: "high".to_string(),
            special_requirements: vec![],
            weight_lbs: 30_000.0,
            max_rate: Decimal::from(900),
            pickup_earliest: now,
            pickup_latest: now + 14_400,
            posted_at: now,
        }
    }

    #[test]
    fn test_posting_conversion() {
        let posting = make_response()
            .into_posting(FeedSource::OpenBoard)
            .unwrap();

        assert_eq!(posting.id, "post-1");
        assert_eq!(posting.equipment, EquipmentClass::Reefer);
        assert_eq!(posting.urgency, UrgencyTier::High);
        assert_eq!(posting.source, FeedSource::OpenBoard);
        assert!(posting.pickup_window.is_ordered());
    }

    #[test]
    fn test_unknown_equipment_dropped() {
        let mut response = make_response();
        response.equipment = "hovercraft".to_string();

        assert!(response.into_posting(FeedSource::Partner).is_none());
    }

    #[test]
    fn test_unknown_urgency_defaults_to_medium() {
        let mut response = make_response();
        response.urgency = "whenever".to_string();

        let posting = response.into_posting(FeedSource::Partner).unwrap();
        assert_eq!(posting.urgency, UrgencyTier::Medium);
    }

    #[test]
    fn test_bid_request_wire_shape() {
        let request = BidRequest {
            posting_id: "post-1".to_string(),
            amount: Decimal::from(750),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["postingId"], "post-1");
    }
}
