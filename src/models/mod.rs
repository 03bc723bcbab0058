//! Data models for capacity units, loads, postings, and geography.

mod capacity;
mod geo;
mod load;
mod posting;

pub use capacity::{CapacityStatus, CapacityUnit, DriverPreferences, EquipmentClass};
pub use geo::GeoPoint;
pub use load::{Load, LoadSpec, LoadStatus, TimeWindow, UrgencyTier};
pub use posting::{FeedSource, LoadPosting};
