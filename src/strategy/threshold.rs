//! Adaptive edge threshold.
//!
//! Picks a base threshold from the configured risk mode and scales it up
//! (never down) by independently capped fee, volatility, and competition
//! factors.

use rust_decimal::prelude::*;
use serde::Deserialize;

use crate::market::MarketConditions;
use crate::types::{KeeperError, RiskMode};

// ---------------------------------------------------------------------------
// Configuration (defaults, overridden by config.toml at runtime)
// ---------------------------------------------------------------------------

/// Base threshold in bps for each risk mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModeThresholds {
    pub conservative: i64,
    pub balanced: i64,
    pub aggressive: i64,
    pub whale: i64,
}

impl Default for ModeThresholds {
    fn default() -> Self {
        Self {
            conservative: 25,
            balanced: 75,
            aggressive: 250,
            whale: 500,
        }
    }
}

impl ModeThresholds {
    pub fn base_for(&self, mode: RiskMode) -> i64 {
        match mode {
            RiskMode::Conservative => self.conservative,
            RiskMode::Balanced => self.balanced,
            RiskMode::Aggressive => self.aggressive,
            RiskMode::Whale => self.whale,
        }
    }

    /// Tiers must be positive and strictly increasing.
    pub fn validate(&self) -> Result<(), KeeperError> {
        let tiers = [self.conservative, self.balanced, self.aggressive, self.whale];
        if tiers[0] <= 0 {
            return Err(KeeperError::Configuration(
                "risk mode thresholds must be positive".to_string(),
            ));
        }
        if tiers.windows(2).any(|w| w[0] >= w[1]) {
            return Err(KeeperError::Configuration(format!(
                "risk mode thresholds must be strictly increasing: {tiers:?}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub mode: RiskMode,
    pub modes: ModeThresholds,
    /// Fee level (gwei) at which the fee factor starts rising above 1.
    pub fee_reference_gwei: f64,
    pub fee_factor_cap: f64,
    pub volatility_weight: f64,
    pub volatility_factor_cap: f64,
    pub competition_weight: f64,
    pub competition_factor_cap: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            mode: RiskMode::Balanced,
            modes: ModeThresholds::default(),
            fee_reference_gwei: 30.0,
            fee_factor_cap: 3.0,
            volatility_weight: 5.0,
            volatility_factor_cap: 2.0,
            competition_weight: 1.5,
            competition_factor_cap: 2.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Multipliers applied to the base threshold, each in `[1, cap]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdFactors {
    pub fee: f64,
    pub volatility: f64,
    pub competition: f64,
}

pub struct AdaptiveThreshold {
    config: ThresholdConfig,
}

/// Clamp into `[1, cap]`. NaN maps to the cap.
fn capped(value: f64, cap: f64) -> f64 {
    let cap = cap.max(1.0);
    if value.is_nan() {
        cap
    } else {
        value.clamp(1.0, cap)
    }
}

fn to_decimal(factor: f64) -> Decimal {
    Decimal::from_f64(factor)
        .map(|d| d.round_dp(4))
        .unwrap_or(Decimal::ONE)
}

impl AdaptiveThreshold {
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    /// Base threshold for the configured risk mode.
    pub fn base_bps(&self) -> i64 {
        self.config.modes.base_for(self.config.mode)
    }

    pub fn factors(&self, conditions: &MarketConditions) -> ThresholdFactors {
        let c = &self.config;
        let fee_ratio = if c.fee_reference_gwei > 0.0 {
            conditions.fee_level_gwei / c.fee_reference_gwei
        } else {
            1.0
        };
        ThresholdFactors {
            fee: capped(fee_ratio, c.fee_factor_cap),
            volatility: capped(
                1.0 + conditions.volatility * c.volatility_weight,
                c.volatility_factor_cap,
            ),
            competition: capped(
                1.0 + conditions.competition * c.competition_weight,
                c.competition_factor_cap,
            ),
        }
    }

    /// `ceil(base × fee × volatility × competition)`, never below base.
    pub fn threshold_bps(&self, conditions: &MarketConditions) -> i64 {
        let base = self.base_bps();
        let f = self.factors(conditions);
        let scaled = Decimal::from(base)
            * to_decimal(f.fee)
            * to_decimal(f.volatility)
            * to_decimal(f.competition);
        scaled.ceil().to_i64().unwrap_or(i64::MAX).max(base)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: RiskMode) -> AdaptiveThreshold {
        AdaptiveThreshold::new(ThresholdConfig {
            mode,
            ..ThresholdConfig::default()
        })
    }

    #[test]
    fn test_calm_market_returns_base() {
        for (mode, base) in [
            (RiskMode::Conservative, 25),
            (RiskMode::Balanced, 75),
            (RiskMode::Aggressive, 250),
            (RiskMode::Whale, 500),
        ] {
            let p = policy(mode);
            assert_eq!(p.threshold_bps(&MarketConditions::fixed(10.0, 0.0, 0.0)), base);
        }
    }

    #[test]
    fn test_factors_capped_individually() {
        let p = policy(RiskMode::Balanced);
        let f = p.factors(&MarketConditions::fixed(10_000.0, 50.0, 1.0));
        assert_eq!(f.fee, 3.0);
        assert_eq!(f.volatility, 2.0);
        assert_eq!(f.competition, 2.5);
        // 75 × 3 × 2 × 2.5
        assert_eq!(p.threshold_bps(&MarketConditions::fixed(10_000.0, 50.0, 1.0)), 1125);
    }

    #[test]
    fn test_threshold_is_ceiling_of_product() {
        let p = policy(RiskMode::Balanced);
        // fee 1.0, vol 1 + 0.02×5 = 1.1, comp 1.0 → 82.5 → 83
        assert_eq!(p.threshold_bps(&MarketConditions::fixed(30.0, 0.02, 0.0)), 83);
        // competition 0.2 → 1.3 → 97.5 → 98
        assert_eq!(p.threshold_bps(&MarketConditions::fixed(0.0, 0.0, 0.2)), 98);
    }

    #[test]
    fn test_monotone_in_each_input() {
        let p = policy(RiskMode::Balanced);
        let steps: Vec<f64> = (0..=40).map(|i| i as f64 * 0.05).collect();

        let mut prev = 0;
        for s in &steps {
            let t = p.threshold_bps(&MarketConditions::fixed(s * 60.0, 0.1, 0.3));
            assert!(t >= prev, "fee not monotone at {s}");
            prev = t;
        }
        let mut prev = 0;
        for s in &steps {
            let t = p.threshold_bps(&MarketConditions::fixed(45.0, s * 0.2, 0.3));
            assert!(t >= prev, "volatility not monotone at {s}");
            prev = t;
        }
        let mut prev = 0;
        for s in &steps {
            let t = p.threshold_bps(&MarketConditions::fixed(45.0, 0.1, s / 2.0));
            assert!(t >= prev, "competition not monotone at {s}");
            prev = t;
        }
    }

    #[test]
    fn test_never_below_base() {
        let p = policy(RiskMode::Whale);
        for (fee, vol, comp) in [(0.0, 0.0, 0.0), (-5.0, -1.0, -1.0), (f64::NAN, 0.0, 0.0)] {
            assert!(p.threshold_bps(&MarketConditions::fixed(fee, vol, comp)) >= 500);
        }
    }

    #[test]
    fn test_mode_threshold_validation() {
        assert!(ModeThresholds::default().validate().is_ok());
        let flat = ModeThresholds {
            conservative: 25,
            balanced: 25,
            aggressive: 250,
            whale: 500,
        };
        assert!(flat.validate().is_err());
        let negative = ModeThresholds {
            conservative: 0,
            ..ModeThresholds::default()
        };
        assert!(negative.validate().is_err());
    }
}
