//! Capacity unit model: a driver+vehicle pairing available to carry loads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::DispatchError;

use super::geo::GeoPoint;

/// Lifecycle status of a capacity unit.
///
/// Legal transitions: Offline <-> Available <-> Negotiating -> Assigned -> Available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityStatus {
    Offline,
    Available,
    Negotiating,
    Assigned,
}

impl CapacityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityStatus::Offline => "offline",
            CapacityStatus::Available => "available",
            CapacityStatus::Negotiating => "negotiating",
            CapacityStatus::Assigned => "assigned",
        }
    }

    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(&self, next: CapacityStatus) -> bool {
        use CapacityStatus::*;
        matches!(
            (*self, next),
            (Offline, Available)
                | (Available, Offline)
                | (Available, Negotiating)
                | (Negotiating, Available)
                | (Negotiating, Assigned)
                | (Assigned, Available)
        )
    }
}

/// Equipment class of a trailer or the class a load requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentClass {
    DryVan,
    Reefer,
    Flatbed,
    Tanker,
    StepDeck,
}

impl EquipmentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentClass::DryVan => "dry_van",
            EquipmentClass::Reefer => "reefer",
            EquipmentClass::Flatbed => "flatbed",
            EquipmentClass::Tanker => "tanker",
            EquipmentClass::StepDeck => "step_deck",
        }
    }
}

impl std::str::FromStr for EquipmentClass {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dry_van" | "van" => Ok(EquipmentClass::DryVan),
            "reefer" => Ok(EquipmentClass::Reefer),
            "flatbed" => Ok(EquipmentClass::Flatbed),
            "tanker" => Ok(EquipmentClass::Tanker),
            "step_deck" | "stepdeck" => Ok(EquipmentClass::StepDeck),
            other => Err(DispatchError::validation(format!(
                "unknown equipment class: {other}"
            ))),
        }
    }
}

/// Per-unit thresholds a match must clear before an offer goes out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverPreferences {
    /// Longest acceptable unloaded run to a pickup, in miles
    pub max_deadhead_miles: f64,

    /// Lowest acceptable linehaul rate per mile
    pub min_rate_per_mile: Decimal,

    /// Accept offers without waiting for the driver
    #[serde(default)]
    pub auto_accept: bool,
}

impl Default for DriverPreferences {
    fn default() -> Self {
        Self {
            max_deadhead_miles: 150.0,
            min_rate_per_mile: dec!(1.50),
            auto_accept: false,
        }
    }
}

/// A driver+vehicle pairing registered with the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityUnit {
    /// Caller-supplied identifier (unit number, carrier ref, etc.)
    pub id: String,

    /// Last reported position
    pub location: GeoPoint,

    /// Current lifecycle status
    #[serde(default = "default_status")]
    pub status: CapacityStatus,

    /// Trailer equipment class
    pub equipment: EquipmentClass,

    /// Remaining hours-of-service before mandatory rest
    pub hours_remaining: f64,

    /// Running average rating (0.0 to 5.0)
    #[serde(default)]
    pub rating: f64,

    /// Number of ratings folded into the average
    #[serde(default)]
    pub rating_count: u32,

    /// Special-requirement tags this unit can serve (e.g. "liftgate", "hazmat")
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Match thresholds for this unit
    #[serde(default)]
    pub preferences: DriverPreferences,

    /// When the location was last refreshed
    #[serde(default = "Utc::now")]
    pub last_location_update: DateTime<Utc>,
}

fn default_status() -> CapacityStatus {
    CapacityStatus::Offline
}

impl CapacityUnit {
    /// Create an offline unit at a starting location.
    pub fn new(id: String, location: GeoPoint, equipment: EquipmentClass) -> Self {
        Self {
            id,
            location,
            status: CapacityStatus::Offline,
            equipment,
            hours_remaining: 11.0,
            rating: 0.0,
            rating_count: 0,
            capabilities: Vec::new(),
            preferences: DriverPreferences::default(),
            last_location_update: Utc::now(),
        }
    }

    /// Fold a new rating score (0-5) into the running average.
    pub fn record_rating(&mut self, score: f64) {
        let score = score.clamp(0.0, 5.0);
        let total = self.rating * self.rating_count as f64 + score;
        self.rating_count += 1;
        self.rating = total / self.rating_count as f64;
    }

    /// Whether this unit can serve every requirement tag on a load.
    pub fn can_serve(&self, requirements: &[String]) -> bool {
        requirements.iter().all(|r| self.capabilities.contains(r))
    }

    /// Check a prospective match against this unit's own thresholds.
    pub fn accepts_match(&self, deadhead_miles: f64, rate_per_mile: Decimal) -> bool {
        deadhead_miles <= self.preferences.max_deadhead_miles
            && rate_per_mile >= self.preferences.min_rate_per_mile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_unit() -> CapacityUnit {
        CapacityUnit::new(
            "unit-1".to_string(),
            GeoPoint::new(41.0, -87.0),
            EquipmentClass::DryVan,
        )
    }

    #[test]
    fn test_status_transitions() {
        use CapacityStatus::*;

        assert!(Offline.can_transition_to(Available));
        assert!(Available.can_transition_to(Offline));
        assert!(Available.can_transition_to(Negotiating));
        assert!(Negotiating.can_transition_to(Available));
        assert!(Negotiating.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(Available));

        // No shortcuts in or out of Assigned.
        assert!(!Available.can_transition_to(Assigned));
        assert!(!Assigned.can_transition_to(Negotiating));
        assert!(!Offline.can_transition_to(Negotiating));
        assert!(!Assigned.can_transition_to(Offline));
    }

    #[test]
    fn test_rating_running_average() {
        let mut unit = make_unit();
        unit.record_rating(4.0);
        unit.record_rating(5.0);

        assert_eq!(unit.rating_count, 2);
        assert!((unit.rating - 4.5).abs() < 1e-9);

        // Out-of-range scores are clamped.
        unit.record_rating(9.0);
        assert!(unit.rating <= 5.0);
    }

    #[test]
    fn test_can_serve_requirements() {
        let mut unit = make_unit();
        unit.capabilities = vec!["liftgate".to_string(), "hazmat".to_string()];

        assert!(unit.can_serve(&[]));
        assert!(unit.can_serve(&["liftgate".to_string()]));
        assert!(!unit.can_serve(&["team".to_string()]));
    }

    #[test]
    fn test_accepts_match_thresholds() {
        let mut unit = make_unit();
        unit.preferences.max_deadhead_miles = 100.0;
        unit.preferences.min_rate_per_mile = dec!(2.00);

        assert!(unit.accepts_match(80.0, dec!(2.50)));
        assert!(!unit.accepts_match(120.0, dec!(2.50)));
        assert!(!unit.accepts_match(80.0, dec!(1.75)));
    }
}
