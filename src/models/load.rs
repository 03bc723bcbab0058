//! Load model: a shipment request moving through the offer lifecycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

use super::capacity::EquipmentClass;
use super::geo::GeoPoint;

/// Lifecycle status of a load.
///
/// Declines and expiries return a load to Pending; Cancelled and
/// Delivered are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Pending,
    Offered,
    Accepted,
    InTransit,
    Delivered,
    Cancelled,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Pending => "pending",
            LoadStatus::Offered => "offered",
            LoadStatus::Accepted => "accepted",
            LoadStatus::InTransit => "in_transit",
            LoadStatus::Delivered => "delivered",
            LoadStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadStatus::Delivered | LoadStatus::Cancelled)
    }

    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(&self, next: LoadStatus) -> bool {
        use LoadStatus::*;
        matches!(
            (*self, next),
            (Pending, Offered)
                | (Pending, Cancelled)
                | (Offered, Accepted)
                | (Offered, Pending)
                | (Offered, Cancelled)
                | (Accepted, InTransit)
                | (Accepted, Cancelled)
                | (InTransit, Delivered)
        )
    }
}

/// How soon a load must move; feeds both pricing and bid scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    Low,
    Medium,
    High,
    Urgent,
}

impl UrgencyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyTier::Low => "low",
            UrgencyTier::Medium => "medium",
            UrgencyTier::High => "high",
            UrgencyTier::Urgent => "urgent",
        }
    }
}

impl std::str::FromStr for UrgencyTier {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(UrgencyTier::Low),
            "medium" => Ok(UrgencyTier::Medium),
            "high" => Ok(UrgencyTier::High),
            "urgent" => Ok(UrgencyTier::Urgent),
            other => Err(DispatchError::validation(format!(
                "unknown urgency tier: {other}"
            ))),
        }
    }
}

/// A pickup or delivery window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(earliest: DateTime<Utc>, latest: DateTime<Utc>) -> Self {
        Self { earliest, latest }
    }

    pub fn is_ordered(&self) -> bool {
        self.earliest < self.latest
    }

    /// Whether the window is open at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.earliest <= now && now <= self.latest
    }
}

/// Intake shape for a new load, validated before any state is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSpec {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub pickup_window: TimeWindow,
    pub delivery_window: TimeWindow,
    pub weight_lbs: f64,
    pub equipment: EquipmentClass,
    pub urgency: UrgencyTier,

    /// Special-requirement tags (e.g. "liftgate", "hazmat")
    #[serde(default)]
    pub special_requirements: Vec<String>,

    /// Shipper's base rate before dynamic pricing
    pub base_rate: Decimal,
}

impl LoadSpec {
    /// Reject malformed specs with a `Validation` error.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if !self.origin.is_valid() {
            return Err(DispatchError::validation("origin coordinates out of range"));
        }
        if !self.destination.is_valid() {
            return Err(DispatchError::validation(
                "destination coordinates out of range",
            ));
        }
        if !self.pickup_window.is_ordered() {
            return Err(DispatchError::validation("pickup window is not ordered"));
        }
        if !self.delivery_window.is_ordered() {
            return Err(DispatchError::validation("delivery window is not ordered"));
        }
        if self.delivery_window.latest <= self.pickup_window.earliest {
            return Err(DispatchError::validation(
                "delivery window closes before pickup opens",
            ));
        }
        if !(self.weight_lbs.is_finite() && self.weight_lbs > 0.0) {
            return Err(DispatchError::validation("weight must be positive"));
        }
        if self.base_rate <= Decimal::ZERO {
            return Err(DispatchError::validation("base rate must be positive"));
        }
        Ok(())
    }
}

/// A shipment request tracked by the load registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Load {
    /// Generated identifier
    pub id: String,

    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub pickup_window: TimeWindow,
    pub delivery_window: TimeWindow,
    pub weight_lbs: f64,
    pub equipment: EquipmentClass,
    pub urgency: UrgencyTier,

    #[serde(default)]
    pub special_requirements: Vec<String>,

    /// Dynamically priced linehaul rate
    pub rate: Decimal,

    pub status: LoadStatus,

    /// Capacity unit currently offered or assigned, if any
    pub assigned_capacity: Option<String>,

    /// Deadline of the outstanding offer, if any
    pub offer_expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Load {
    /// Create a Pending load from a validated spec and a computed rate.
    pub fn from_spec(spec: LoadSpec, rate: Decimal) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            origin: spec.origin,
            destination: spec.destination,
            pickup_window: spec.pickup_window,
            delivery_window: spec.delivery_window,
            weight_lbs: spec.weight_lbs,
            equipment: spec.equipment,
            urgency: spec.urgency,
            special_requirements: spec.special_requirements,
            rate,
            status: LoadStatus::Pending,
            assigned_capacity: None,
            offer_expires_at: None,
            created_at: Utc::now(),
        }
    }

    /// Loaded (linehaul) distance from origin to destination, in miles.
    pub fn linehaul_miles(&self) -> f64 {
        self.origin.distance_miles(&self.destination)
    }

    /// Rate per loaded mile; zero-distance loads report zero.
    pub fn rate_per_mile(&self) -> Decimal {
        let miles = self.linehaul_miles();
        if miles <= 0.0 {
            return Decimal::ZERO;
        }
        let miles = Decimal::try_from(miles).unwrap_or(Decimal::ONE);
        self.rate / miles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn make_spec() -> LoadSpec {
        let now = Utc::now();
        LoadSpec {
            origin: GeoPoint::new(41.8781, -87.6298),
            destination: GeoPoint::new(39.7684, -86.1581),
            pickup_window: TimeWindow::new(now, now + Duration::hours(4)),
            delivery_window: TimeWindow::new(now + Duration::hours(6), now + Duration::hours(18)),
            weight_lbs: 24_000.0,
            equipment: EquipmentClass::DryVan,
            urgency: UrgencyTier::Medium,
            special_requirements: vec![],
            base_rate: dec!(800),
        }
    }

    #[test]
    fn test_spec_validation() {
        assert!(make_spec().validate().is_ok());

        let mut bad = make_spec();
        bad.origin = GeoPoint::new(95.0, 0.0);
        assert!(matches!(
            bad.validate(),
            Err(DispatchError::Validation { .. })
        ));

        let mut bad = make_spec();
        bad.pickup_window.latest = bad.pickup_window.earliest - Duration::hours(1);
        assert!(bad.validate().is_err());

        let mut bad = make_spec();
        bad.weight_lbs = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = make_spec();
        bad.base_rate = Decimal::ZERO;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_status_transitions() {
        use LoadStatus::*;

        assert!(Pending.can_transition_to(Offered));
        assert!(Offered.can_transition_to(Accepted));
        assert!(Offered.can_transition_to(Pending));
        assert!(Accepted.can_transition_to(InTransit));
        assert!(InTransit.can_transition_to(Delivered));
        assert!(Pending.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Accepted));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(Delivered.is_terminal());
        assert!(Cancelled.is_terminal());
    }

    #[test]
    fn test_rate_per_mile() {
        let load = Load::from_spec(make_spec(), dec!(1650));
        let miles = load.linehaul_miles();
        assert!(miles > 150.0 && miles < 180.0);

        let rpm = load.rate_per_mile();
        assert!(rpm > dec!(9) && rpm < dec!(11), "got {rpm}");
    }
}
