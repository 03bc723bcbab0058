//! Candidate scoring for load/capacity matches.
//!
//! Weights (max 100):
//! - equipment match: 40 (candidates are pre-filtered to exact match)
//! - pickup proximity: 20 / 15 / 10 / 0 by deadhead bucket
//! - rating: rating x 4, capped at 20
//! - hours-of-service buffer: 10 / 5 / 0
//! - special-requirement compatibility: up to 10

use std::cmp::Ordering;

use crate::models::{CapacityUnit, Load};

const EQUIPMENT_POINTS: f64 = 40.0;
const RATING_CAP: f64 = 20.0;

/// One scored load/capacity pairing.
#[derive(Debug, Clone)]
pub struct MatchScore {
    pub capacity_id: String,
    pub score: f64,
    pub deadhead_miles: f64,
}

/// Score a pre-filtered candidate (exact equipment match, Available).
pub fn score_candidate(load: &Load, unit: &CapacityUnit) -> MatchScore {
    let deadhead = unit.location.distance_miles(&load.origin);

    let proximity = if deadhead < 50.0 {
        20.0
    } else if deadhead < 100.0 {
        15.0
    } else if deadhead < 200.0 {
        10.0
    } else {
        0.0
    };

    let rating = (unit.rating * 4.0).min(RATING_CAP);

    let hours_buffer = if unit.hours_remaining > 8.0 {
        10.0
    } else if unit.hours_remaining > 4.0 {
        5.0
    } else {
        0.0
    };

    let special = if load.special_requirements.is_empty() {
        10.0
    } else {
        let met = load
            .special_requirements
            .iter()
            .filter(|r| unit.capabilities.contains(r))
            .count();
        10.0 * met as f64 / load.special_requirements.len() as f64
    };

    MatchScore {
        capacity_id: unit.id.clone(),
        score: EQUIPMENT_POINTS + proximity + rating + hours_buffer + special,
        deadhead_miles: deadhead,
    }
}

/// Order candidates best-first: highest score, then shortest deadhead,
/// then lowest id, so identical inputs always pick the same winner.
pub fn rank_candidates(mut scores: Vec<MatchScore>) -> Vec<MatchScore> {
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(
                a.deadhead_miles
                    .partial_cmp(&b.deadhead_miles)
                    .unwrap_or(Ordering::Equal),
            )
            .then_with(|| a.capacity_id.cmp(&b.capacity_id))
    });
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EquipmentClass, GeoPoint, LoadSpec, TimeWindow, UrgencyTier};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn make_load(origin: GeoPoint, requirements: Vec<String>) -> Load {
        let now = Utc::now();
        let spec = LoadSpec {
            origin,
            destination: GeoPoint::new(39.7684, -86.1581),
            pickup_window: TimeWindow::new(now, now + Duration::hours(4)),
            delivery_window: TimeWindow::new(now + Duration::hours(6), now + Duration::hours(18)),
            weight_lbs: 20_000.0,
            equipment: EquipmentClass::DryVan,
            urgency: UrgencyTier::Medium,
            special_requirements: requirements,
            base_rate: dec!(800),
        };
        Load::from_spec(spec, dec!(800))
    }

    fn make_unit(id: &str, location: GeoPoint) -> CapacityUnit {
        let mut unit = CapacityUnit::new(id.to_string(), location, EquipmentClass::DryVan);
        unit.hours_remaining = 10.0;
        unit
    }

    // Points at controlled distances along a parallel: one degree of
    // longitude at 41.8N is roughly 51.5 miles.
    fn point_miles_east(from: GeoPoint, miles: f64) -> GeoPoint {
        let miles_per_deg = from.lat.to_radians().cos() * 69.17;
        GeoPoint::new(from.lat, from.lon + miles / miles_per_deg)
    }

    #[test]
    fn test_proximity_buckets() {
        let origin = GeoPoint::new(41.8781, -87.6298);
        let load = make_load(origin, vec![]);

        let near = score_candidate(&load, &make_unit("u", point_miles_east(origin, 10.0)));
        let mid = score_candidate(&load, &make_unit("u", point_miles_east(origin, 75.0)));
        let far = score_candidate(&load, &make_unit("u", point_miles_east(origin, 150.0)));
        let out = score_candidate(&load, &make_unit("u", point_miles_east(origin, 300.0)));

        // 40 equipment + proximity + 10 HOS + 10 special (no requirements).
        assert_eq!(near.score, 80.0);
        assert_eq!(mid.score, 75.0);
        assert_eq!(far.score, 70.0);
        assert_eq!(out.score, 60.0);
    }

    #[test]
    fn test_rating_capped_at_twenty() {
        let origin = GeoPoint::new(41.8781, -87.6298);
        let load = make_load(origin, vec![]);

        let mut unit = make_unit("u", origin);
        unit.rating = 5.0;
        assert_eq!(score_candidate(&load, &unit).score, 100.0);

        unit.rating = 3.0;
        assert_eq!(score_candidate(&load, &unit).score, 92.0);
    }

    #[test]
    fn test_hours_of_service_buffer() {
        let origin = GeoPoint::new(41.8781, -87.6298);
        let load = make_load(origin, vec![]);

        let mut unit = make_unit("u", origin);
        unit.hours_remaining = 6.0;
        assert_eq!(score_candidate(&load, &unit).score, 75.0);

        unit.hours_remaining = 2.0;
        assert_eq!(score_candidate(&load, &unit).score, 70.0);
    }

    #[test]
    fn test_partial_special_requirements() {
        let origin = GeoPoint::new(41.8781, -87.6298);
        let load = make_load(origin, vec!["liftgate".to_string(), "hazmat".to_string()]);

        let mut unit = make_unit("u", origin);
        unit.capabilities = vec!["liftgate".to_string()];

        // 40 + 20 + 0 rating + 10 HOS + 5 (one of two tags).
        assert_eq!(score_candidate(&load, &unit).score, 75.0);
    }

    #[test]
    fn test_nearest_unit_wins() {
        let origin = GeoPoint::new(41.8781, -87.6298);
        let load = make_load(origin, vec![]);

        let near = make_unit("far-id-zzz", point_miles_east(origin, 10.0));
        let far = make_unit("aaa", point_miles_east(origin, 300.0));

        let ranked = rank_candidates(vec![
            score_candidate(&load, &far),
            score_candidate(&load, &near),
        ]);

        assert_eq!(ranked[0].capacity_id, "far-id-zzz");
        assert!(ranked[0].deadhead_miles < 20.0);
    }

    #[test]
    fn test_tie_breaks_deterministic() {
        let origin = GeoPoint::new(41.8781, -87.6298);
        let load = make_load(origin, vec![]);

        // Identical units at the same spot differ only by id.
        let a = score_candidate(&load, &make_unit("unit-a", origin));
        let b = score_candidate(&load, &make_unit("unit-b", origin));

        let ranked = rank_candidates(vec![b, a]);
        assert_eq!(ranked[0].capacity_id, "unit-a");
    }
}
