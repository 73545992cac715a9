//! Per-cycle report.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::strategy::breaker::BreakerStatus;
use crate::types::{BreakerRejection, TradeOutcome};

/// How a cycle ended.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// An execution was attempted; see `success` on the outcome.
    Executed(TradeOutcome),
    /// No size cleared the threshold.
    NoOpportunity,
    BreakerRejected(BreakerRejection),
    /// Execution could not start (no identity or sequence).
    ExecutionError(String),
}

impl CycleOutcome {
    /// Only a confirmed execution counts as actionable.
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Executed(outcome) if outcome.success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Executed(o) if o.success => "executed",
            CycleOutcome::Executed(_) => "execution_failed",
            CycleOutcome::NoOpportunity => "no_opportunity",
            CycleOutcome::BreakerRejected(_) => "breaker_rejected",
            CycleOutcome::ExecutionError(_) => "execution_error",
        }
    }
}

/// Summary of one evaluate → gate → execute cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub sizes_evaluated: usize,
    /// Sizes that cleared the threshold (executed or vetoed).
    pub opportunities_found: usize,
    pub best_edge_bps: Option<i64>,
    pub threshold_bps: i64,
    pub outcome: CycleOutcome,
    pub breaker_status: BreakerStatus,
    pub daily_loss: Decimal,
    pub fee_level_gwei: f64,
    pub volatility: f64,
    pub competition: f64,
    pub timestamp: DateTime<Utc>,
}

/// Log a human-readable cycle summary.
pub fn log_cycle_report(report: &CycleReport) {
    let best = report
        .best_edge_bps
        .map(|b| format!("{b}bps"))
        .unwrap_or_else(|| "-".to_string());

    if report.breaker_status == BreakerStatus::Normal {
        info!(
            cycle = report.cycle_number,
            sizes = report.sizes_evaluated,
            found = report.opportunities_found,
            best_edge = %best,
            threshold = format!("{}bps", report.threshold_bps),
            outcome = report.outcome.label(),
            breaker = %report.breaker_status,
            daily_loss = format!("${:.2}", report.daily_loss),
            fee_gwei = format!("{:.1}", report.fee_level_gwei),
            competition = format!("{:.2}", report.competition),
            "Cycle complete"
        );
    } else {
        warn!(
            cycle = report.cycle_number,
            sizes = report.sizes_evaluated,
            best_edge = %best,
            threshold = format!("{}bps", report.threshold_bps),
            outcome = report.outcome.label(),
            breaker = %report.breaker_status,
            daily_loss = format!("${:.2}", report.daily_loss),
            "Cycle complete (breaker not normal)"
        );
    }
}
