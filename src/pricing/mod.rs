//! Dynamic pricing: a pure calculation over base rate, distance,
//! urgency, and the current supply/demand balance.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::UrgencyTier;

/// Pricing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Floor applied to the final rate, per loaded mile
    pub min_rate_per_mile: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            min_rate_per_mile: dec!(1.50),
        }
    }
}

/// Supply/demand ratio smoothed so empty registries stay finite:
/// (available + 1) / (pending + 1).
pub fn demand_ratio(available_units: usize, pending_loads: usize) -> f64 {
    (available_units as f64 + 1.0) / (pending_loads as f64 + 1.0)
}

/// Rate calculator; pure given an explicit supply/demand ratio.
pub struct RateCalculator {
    config: PricingConfig,
}

impl RateCalculator {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Price a load.
    ///
    /// The single most severe demand bracket applies (never compounded),
    /// then the urgency factor, then the configured rate-per-mile floor.
    /// Rounded to 2 decimals.
    pub fn price(
        &self,
        base_rate: Decimal,
        distance_miles: f64,
        urgency: UrgencyTier,
        supply_demand_ratio: f64,
    ) -> Decimal {
        let demand_multiplier = if supply_demand_ratio < 0.1 {
            dec!(3.0)
        } else if supply_demand_ratio < 0.2 {
            dec!(2.0)
        } else if supply_demand_ratio < 0.5 {
            dec!(1.5)
        } else {
            Decimal::ONE
        };

        let urgency_factor = match urgency {
            UrgencyTier::High | UrgencyTier::Urgent => dec!(1.25),
            UrgencyTier::Medium => dec!(1.1),
            UrgencyTier::Low => Decimal::ONE,
        };

        let mut rate = base_rate * demand_multiplier * urgency_factor;

        if distance_miles > 0.0 {
            let miles = Decimal::try_from(distance_miles).unwrap_or(Decimal::ONE);
            let floor = self.config.min_rate_per_mile * miles;
            if rate < floor {
                rate = floor;
            }
        }

        rate.round_dp(2)
    }
}

impl Default for RateCalculator {
    fn default() -> Self {
        Self::new(PricingConfig::default())
    }
}
