//! Owned registry services for fleet capacity and loads.

mod fleet;
mod loads;

pub use fleet::FleetRegistry;
pub use loads::{LoadRegistry, OfferResolution};
