//! Fleet registry: owns capacity-unit state and validates every transition.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{DispatchError, Result};
use crate::models::{CapacityStatus, CapacityUnit, EquipmentClass, GeoPoint};

/// Owned registry service for capacity units.
///
/// All mutations run inside one short write-lock critical section, which
/// serializes writers per entity. Reads hand out cloned snapshots;
/// callers must re-validate with a compare-and-set transition before
/// acting on a snapshot.
#[derive(Clone)]
pub struct FleetRegistry {
    units: Arc<RwLock<HashMap<String, CapacityUnit>>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self {
            units: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new unit. Duplicate ids are rejected before any state
    /// is touched.
    pub async fn register(&self, unit: CapacityUnit) -> Result<()> {
        let mut units = self.units.write().await;
        if units.contains_key(&unit.id) {
            return Err(DispatchError::validation(format!(
                "capacity unit {} already registered",
                unit.id
            )));
        }

        info!(capacity_id = %unit.id, equipment = unit.equipment.as_str(), "Registered capacity unit");
        units.insert(unit.id.clone(), unit);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<CapacityUnit> {
        self.units.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.units.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.units.read().await.is_empty()
    }

    /// Validated transition to any legal next status.
    pub async fn transition(&self, id: &str, to: CapacityStatus) -> Result<()> {
        let mut units = self.units.write().await;
        let unit = units
            .get_mut(id)
            .ok_or_else(|| DispatchError::CapacityNotFound(id.to_string()))?;

        if !unit.status.can_transition_to(to) {
            return Err(DispatchError::StateConflict {
                entity: "capacity",
                id: id.to_string(),
                from: unit.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        debug!(capacity_id = %id, from = unit.status.as_str(), to = to.as_str(), "Capacity transition");
        unit.status = to;
        Ok(())
    }

    /// Compare-and-set transition: succeeds only if the unit is still in
    /// `from`. Used by matching and offer resolution to re-validate
    /// snapshots before mutating.
    pub async fn transition_from(
        &self,
        id: &str,
        from: CapacityStatus,
        to: CapacityStatus,
    ) -> Result<()> {
        let mut units = self.units.write().await;
        let unit = units
            .get_mut(id)
            .ok_or_else(|| DispatchError::CapacityNotFound(id.to_string()))?;

        if unit.status != from || !from.can_transition_to(to) {
            return Err(DispatchError::StateConflict {
                entity: "capacity",
                id: id.to_string(),
                from: unit.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        debug!(capacity_id = %id, from = from.as_str(), to = to.as_str(), "Capacity transition");
        unit.status = to;
        Ok(())
    }

    /// Bring a unit online and ready for matching.
    pub async fn set_available(&self, id: &str) -> Result<()> {
        self.transition(id, CapacityStatus::Available).await
    }

    /// Take a unit off the board. Only legal from Available; a unit in
    /// negotiation or under load must finish first.
    pub async fn set_offline(&self, id: &str) -> Result<()> {
        self.transition_from(id, CapacityStatus::Available, CapacityStatus::Offline)
            .await
    }

    /// Ingest an external location update.
    pub async fn update_location(&self, id: &str, location: GeoPoint) -> Result<()> {
        if !location.is_valid() {
            return Err(DispatchError::validation("location coordinates out of range"));
        }

        let mut units = self.units.write().await;
        let unit = units
            .get_mut(id)
            .ok_or_else(|| DispatchError::CapacityNotFound(id.to_string()))?;

        unit.location = location;
        unit.last_location_update = chrono::Utc::now();
        Ok(())
    }

    /// Snapshot of Available units, optionally narrowed to one
    /// equipment class.
    pub async fn query_available(&self, equipment: Option<EquipmentClass>) -> Vec<CapacityUnit> {
        let units = self.units.read().await;
        units
            .values()
            .filter(|u| u.status == CapacityStatus::Available)
            .filter(|u| equipment.map_or(true, |e| u.equipment == e))
            .cloned()
            .collect()
    }

    /// Fold a rating score into a unit's running average; returns the
    /// new average.
    pub async fn record_rating(&self, id: &str, score: f64) -> Result<f64> {
        let mut units = self.units.write().await;
        let unit = units
            .get_mut(id)
            .ok_or_else(|| DispatchError::CapacityNotFound(id.to_string()))?;

        unit.record_rating(score);
        Ok(unit.rating)
    }

    /// Per-status unit counts: (total, available, negotiating, assigned, offline).
    pub async fn status_counts(&self) -> (usize, usize, usize, usize, usize) {
        let units = self.units.read().await;
        let mut available = 0;
        let mut negotiating = 0;
        let mut assigned = 0;
        let mut offline = 0;

        for unit in units.values() {
            match unit.status {
                CapacityStatus::Available => available += 1,
                CapacityStatus::Negotiating => negotiating += 1,
                CapacityStatus::Assigned => assigned += 1,
                CapacityStatus::Offline => offline += 1,
            }
        }

        (units.len(), available, negotiating, assigned, offline)
    }
}

impl Default for FleetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_unit(id: &str) -> CapacityUnit {
        CapacityUnit::new(
            id.to_string(),
            GeoPoint::new(41.0, -87.0),
            EquipmentClass::DryVan,
        )
    }

    #[tokio::test]
    async fn test_register_and_duplicate() {
        let fleet = FleetRegistry::new();
        fleet.register(make_unit("u1")).await.unwrap();

        let err = fleet.register(make_unit("u1")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let fleet = FleetRegistry::new();
        fleet.register(make_unit("u1")).await.unwrap();

        // Offline -> Assigned is not an edge of the state machine.
        let err = fleet
            .transition("u1", CapacityStatus::Assigned)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::StateConflict { .. }));

        fleet.set_available("u1").await.unwrap();
        fleet
            .transition("u1", CapacityStatus::Negotiating)
            .await
            .unwrap();
        fleet
            .transition("u1", CapacityStatus::Assigned)
            .await
            .unwrap();
        fleet.set_available("u1").await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_only_from_available() {
        let fleet = FleetRegistry::new();
        fleet.register(make_unit("u1")).await.unwrap();
        fleet.set_available("u1").await.unwrap();
        fleet
            .transition("u1", CapacityStatus::Negotiating)
            .await
            .unwrap();

        assert!(fleet.set_offline("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_compare_and_set_detects_stale_state() {
        let fleet = FleetRegistry::new();
        fleet.register(make_unit("u1")).await.unwrap();
        fleet.set_available("u1").await.unwrap();

        // First CAS wins, second loses.
        fleet
            .transition_from("u1", CapacityStatus::Available, CapacityStatus::Negotiating)
            .await
            .unwrap();
        let err = fleet
            .transition_from("u1", CapacityStatus::Available, CapacityStatus::Negotiating)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::StateConflict { .. }));
    }

    #[tokio::test]
    async fn test_query_available_filters_equipment() {
        let fleet = FleetRegistry::new();
        let mut reefer = make_unit("r1");
        reefer.equipment = EquipmentClass::Reefer;
        fleet.register(reefer).await.unwrap();
        fleet.register(make_unit("v1")).await.unwrap();

        fleet.set_available("r1").await.unwrap();
        fleet.set_available("v1").await.unwrap();

        let reefers = fleet.query_available(Some(EquipmentClass::Reefer)).await;
        assert_eq!(reefers.len(), 1);
        assert_eq!(reefers[0].id, "r1");

        let all = fleet.query_available(None).await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_unit() {
        let fleet = FleetRegistry::new();
        let err = fleet.set_available("ghost").await.unwrap_err();
        assert!(matches!(err, DispatchError::CapacityNotFound(_)));
    }
}
