//! Market condition monitoring.
//!
//! Samples network fee level and mempool contention, keeps a bounded fee
//! history, and derives a volatility estimate (coefficient of variation over
//! the recent window) and a normalised competition score.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Abstraction over network condition signals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketSignals: Send + Sync {
    /// Current fee level in gwei.
    async fn fee_level(&self) -> anyhow::Result<f64>;

    /// Raw contention count (e.g. pending transactions competing for the block).
    async fn contention(&self) -> anyhow::Result<u64>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Ring size for the fee history (288 = 24h of 5-minute samples).
    pub history_capacity: usize,
    /// Most recent samples used for the volatility estimate.
    pub volatility_window: usize,
    /// Contention count at which competition saturates to 1.0.
    pub contention_saturation: u64,
    /// Minimum spacing between external samples.
    pub min_sample_interval: Duration,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            history_capacity: 288,
            volatility_window: 12,
            contention_saturation: 300,
            min_sample_interval: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Latest derived view of the market.
#[derive(Debug, Clone, Serialize)]
pub struct MarketConditions {
    pub fee_level_gwei: f64,
    pub fee_history: VecDeque<f64>,
    pub volatility: f64,
    /// 0.0 (no contention) to 1.0 (saturated).
    pub competition: f64,
    pub sampled_at: Option<DateTime<Utc>>,
}

impl Default for MarketConditions {
    fn default() -> Self {
        Self {
            fee_level_gwei: 0.0,
            fee_history: VecDeque::new(),
            volatility: 0.0,
            competition: 0.0,
            sampled_at: None,
        }
    }
}

impl MarketConditions {
    /// Conditions with fixed values; convenient for tests and dry runs.
    pub fn fixed(fee_level_gwei: f64, volatility: f64, competition: f64) -> Self {
        Self {
            fee_level_gwei,
            volatility,
            competition,
            ..Self::default()
        }
    }
}

/// Population standard deviation over mean. Zero for fewer than two samples
/// or a non-positive mean.
pub fn coefficient_of_variation(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub struct MarketConditionMonitor {
    config: MarketConfig,
    conditions: MarketConditions,
    last_sample: Option<Instant>,
}

impl MarketConditionMonitor {
    pub fn new(config: MarketConfig) -> Self {
        Self {
            config,
            conditions: MarketConditions::default(),
            last_sample: None,
        }
    }

    pub fn conditions(&self) -> &MarketConditions {
        &self.conditions
    }

    /// Sample both signals concurrently and fold them in. Skipped when the
    /// previous sample is younger than `min_sample_interval`. A failed signal
    /// leaves its previous value untouched. Returns whether a sample was taken.
    pub async fn sample(&mut self, signals: &dyn MarketSignals) -> bool {
        if let Some(last) = self.last_sample {
            if last.elapsed() < self.config.min_sample_interval {
                return false;
            }
        }
        self.last_sample = Some(Instant::now());

        let (fee, contention) = tokio::join!(signals.fee_level(), signals.contention());

        let fee = fee
            .map_err(|e| warn!(error = %e, "Fee level sample failed, keeping previous"))
            .ok();
        let contention = contention
            .map_err(|e| warn!(error = %e, "Contention sample failed, keeping previous"))
            .ok();

        self.record(fee, contention, Utc::now());
        true
    }

    /// Fold raw observations into the conditions.
    pub fn record(&mut self, fee_level_gwei: Option<f64>, contention: Option<u64>, now: DateTime<Utc>) {
        let mut updated = false;

        if let Some(fee) = fee_level_gwei.filter(|f| f.is_finite() && *f >= 0.0) {
            self.conditions.fee_level_gwei = fee;
            self.conditions.fee_history.push_back(fee);
            while self.conditions.fee_history.len() > self.config.history_capacity.max(1) {
                self.conditions.fee_history.pop_front();
            }
            let window = self.config.volatility_window.min(self.conditions.fee_history.len());
            let recent: Vec<f64> = self
                .conditions
                .fee_history
                .iter()
                .skip(self.conditions.fee_history.len() - window)
                .copied()
                .collect();
            self.conditions.volatility = coefficient_of_variation(&recent);
            updated = true;
        }

        if let Some(count) = contention {
            let saturation = self.config.contention_saturation.max(1) as f64;
            self.conditions.competition = (count as f64 / saturation).min(1.0);
            updated = true;
        }

        if updated {
            self.conditions.sampled_at = Some(now);
            debug!(
                fee_gwei = self.conditions.fee_level_gwei,
                volatility = format!("{:.4}", self.conditions.volatility),
                competition = format!("{:.2}", self.conditions.competition),
                history = self.conditions.fee_history.len(),
                "Market conditions updated"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
