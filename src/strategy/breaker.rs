//! Circuit breaker.
//!
//! Stateful execution gate that is independent of profitability. Tracks
//! consecutive failures, the rolling 24h loss, and a sticky emergency halt
//! that only an operator can clear.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::market::MarketConditions;
use crate::types::BreakerRejection;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Cumulative loss (quote currency) tolerated per 24h window.
    pub max_daily_loss: Decimal,
    /// Consecutive failures that trip the cooldown.
    pub max_consecutive_failures: u32,
    pub cooldown: Duration,
    /// Fee level ceiling in gwei.
    pub max_fee_level_gwei: f64,
    pub max_volatility: f64,
    /// A single loss at or above this sets the emergency halt.
    pub catastrophic_loss: Option<Decimal>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: dec!(100),
            max_consecutive_failures: 3,
            cooldown: Duration::minutes(5),
            max_fee_level_gwei: 200.0,
            max_volatility: 0.5,
            catastrophic_loss: Some(dec!(50)),
        }
    }
}

/// Length of the loss-accounting window.
fn daily_window() -> Duration {
    Duration::hours(24)
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Persisted breaker state. Survives restarts so a halt is not lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub daily_loss: Decimal,
    pub window_start: DateTime<Utc>,
    pub emergency_halt: bool,
    #[serde(default)]
    pub halt_reason: Option<String>,
}

impl CircuitBreakerState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            consecutive_failures: 0,
            last_failure: None,
            daily_loss: Decimal::ZERO,
            window_start: now,
            emergency_halt: false,
            halt_reason: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Normal,
    Tripped,
    EmergencyHalt,
}

impl std::fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerStatus::Normal => write!(f, "normal"),
            BreakerStatus::Tripped => write!(f, "tripped"),
            BreakerStatus::EmergencyHalt => write!(f, "emergency_halt"),
        }
    }
}

// ---------------------------------------------------------------------------
// Breaker
// ---------------------------------------------------------------------------

pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitBreakerState,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: CircuitBreakerState::new(now),
        }
    }

    /// Resume from persisted state.
    pub fn with_state(config: BreakerConfig, state: CircuitBreakerState) -> Self {
        if state.emergency_halt {
            warn!(
                reason = state.halt_reason.as_deref().unwrap_or("unknown"),
                "Restored breaker is in emergency halt"
            );
        }
        Self { config, state }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        if self.state.consecutive_failures < self.config.max_consecutive_failures {
            return false;
        }
        match self.state.last_failure {
            Some(at) => now - at < self.config.cooldown,
            None => false,
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> BreakerStatus {
        if self.state.emergency_halt {
            BreakerStatus::EmergencyHalt
        } else if self.in_cooldown(now) {
            BreakerStatus::Tripped
        } else {
            BreakerStatus::Normal
        }
    }

    /// Losses in the current window are above the daily cap.
    pub fn daily_loss_exceeded(&self) -> bool {
        self.state.daily_loss > self.config.max_daily_loss
    }

    /// Start a fresh loss window once 24h have passed.
    fn roll_window(&mut self, now: DateTime<Utc>) {
        if now - self.state.window_start >= daily_window() {
            if !self.state.daily_loss.is_zero() {
                info!(
                    previous_loss = %self.state.daily_loss,
                    "Daily loss window rolled over"
                );
            }
            self.state.daily_loss = Decimal::ZERO;
            self.state.window_start = now;
        }
    }

    /// Gate an execution. Checks run in a fixed order and the first
    /// rejection wins.
    pub fn check(
        &mut self,
        conditions: &MarketConditions,
        now: DateTime<Utc>,
    ) -> Result<(), BreakerRejection> {
        if self.state.emergency_halt {
            return Err(BreakerRejection::EmergencyStop);
        }

        self.roll_window(now);

        if self.daily_loss_exceeded() {
            return Err(BreakerRejection::DailyLossExceeded);
        }

        if self.in_cooldown(now) {
            return Err(BreakerRejection::Cooldown);
        }

        if conditions.fee_level_gwei > self.config.max_fee_level_gwei
            || conditions.volatility > self.config.max_volatility
            || conditions.fee_level_gwei.is_nan()
            || conditions.volatility.is_nan()
        {
            return Err(BreakerRejection::MarketUnsafe);
        }

        Ok(())
    }

    /// Boolean form of [`check`](Self::check).
    pub fn proceed(&mut self, conditions: &MarketConditions, now: DateTime<Utc>) -> bool {
        self.check(conditions, now).is_ok()
    }

    /// Record a failed execution and its loss.
    pub fn record_failure(&mut self, loss: Decimal, now: DateTime<Utc>) {
        self.roll_window(now);

        let loss = loss.max(Decimal::ZERO);
        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        self.state.last_failure = Some(now);
        self.state.daily_loss += loss;

        warn!(
            failures = self.state.consecutive_failures,
            loss = %loss,
            daily_loss = %self.state.daily_loss,
            "Execution failure recorded"
        );

        if let Some(limit) = self.config.catastrophic_loss {
            if loss >= limit {
                self.trip_emergency(format!("single loss {loss} >= limit {limit}"));
            }
        }
    }

    /// Record a successful execution. Failures recover one step at a time.
    pub fn record_success(&mut self) {
        self.state.consecutive_failures = self.state.consecutive_failures.saturating_sub(1);
    }

    /// Set the sticky emergency halt.
    pub fn trip_emergency(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "EMERGENCY HALT engaged, operator reset required");
        self.state.emergency_halt = true;
        self.state.halt_reason = Some(reason);
    }

    /// Operator reset. The only way to leave the emergency halt.
    pub fn clear_emergency_halt(&mut self, operator: &str) {
        if self.state.emergency_halt {
            info!(
                operator,
                reason = self.state.halt_reason.as_deref().unwrap_or("unknown"),
                "Emergency halt cleared by operator"
            );
        }
        self.state.emergency_halt = false;
        self.state.halt_reason = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
