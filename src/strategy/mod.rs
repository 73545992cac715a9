//! Strategy engine: edge evaluation, adaptive threshold, circuit breaker,
//! and backoff.

pub mod backoff;
pub mod breaker;
pub mod edge;
pub mod threshold;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::market::MarketConditions;
use crate::types::{ArbitrageOpportunity, BreakerRejection, CandidateSize, KeeperError};
use breaker::CircuitBreaker;
use edge::EdgeCalculator;
use threshold::AdaptiveThreshold;

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// Record of every per-size decision made during a pass, including the
/// candidates that were passed on and why.
#[derive(Debug)]
pub enum DecisionRecord {
    /// Cleared the threshold and the breaker; ready for execution.
    Selected {
        opportunity: ArbitrageOpportunity,
        threshold_bps: i64,
    },
    /// Candidate dropped locally (unavailable, slippage, below threshold, net loss).
    Skipped {
        size: CandidateSize,
        edge_bps: Option<i64>,
        threshold_bps: i64,
        error: KeeperError,
    },
    /// Profitable candidate vetoed by the breaker. Ends the pass.
    BreakerRejected {
        opportunity: ArbitrageOpportunity,
        threshold_bps: i64,
        reason: BreakerRejection,
    },
}

impl DecisionRecord {
    pub fn size(&self) -> CandidateSize {
        match self {
            DecisionRecord::Selected { opportunity, .. } => opportunity.size,
            DecisionRecord::Skipped { size, .. } => *size,
            DecisionRecord::BreakerRejected { opportunity, .. } => opportunity.size,
        }
    }

    /// Adjusted edge, when the candidate got far enough to have one.
    pub fn edge_bps(&self) -> Option<i64> {
        match self {
            DecisionRecord::Selected { opportunity, .. } => Some(opportunity.adjusted_edge_bps),
            DecisionRecord::Skipped { edge_bps, .. } => *edge_bps,
            DecisionRecord::BreakerRejected { opportunity, .. } => {
                Some(opportunity.adjusted_edge_bps)
            }
        }
    }
}

/// Outcome of one pass over the candidate sizes.
#[derive(Debug)]
pub struct SelectionPass {
    pub threshold_bps: i64,
    pub decisions: Vec<DecisionRecord>,
}

impl SelectionPass {
    pub fn selected(&self) -> Option<&ArbitrageOpportunity> {
        self.decisions.iter().find_map(|d| match d {
            DecisionRecord::Selected { opportunity, .. } => Some(opportunity),
            _ => None,
        })
    }

    pub fn breaker_rejection(&self) -> Option<BreakerRejection> {
        self.decisions.iter().find_map(|d| match d {
            DecisionRecord::BreakerRejected { reason, .. } => Some(*reason),
            _ => None,
        })
    }

    /// Best adjusted edge seen this pass.
    pub fn best_edge_bps(&self) -> Option<i64> {
        self.decisions.iter().filter_map(DecisionRecord::edge_bps).max()
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Pipelines edge evaluation → threshold comparison → net-profit check →
/// breaker check, size by size in configured order, stopping at the first
/// candidate that passes or at the first breaker veto.
pub struct OpportunityGate {
    threshold: AdaptiveThreshold,
    breaker: CircuitBreaker,
}

impl OpportunityGate {
    pub fn new(threshold: AdaptiveThreshold, breaker: CircuitBreaker) -> Self {
        Self { threshold, breaker }
    }

    pub fn threshold(&self) -> &AdaptiveThreshold {
        &self.threshold
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn breaker_mut(&mut self) -> &mut CircuitBreaker {
        &mut self.breaker
    }

    pub async fn select(
        &mut self,
        calculator: &EdgeCalculator,
        sizes: &[CandidateSize],
        conditions: &MarketConditions,
        now: DateTime<Utc>,
    ) -> SelectionPass {
        let threshold_bps = self.threshold.threshold_bps(conditions);
        let mut decisions = Vec::new();

        for &size in sizes {
            let opportunity = match calculator.evaluate(size).await {
                Ok(opp) => opp,
                Err(error) => {
                    debug!(size = %size, error = %error, "Candidate skipped");
                    decisions.push(DecisionRecord::Skipped {
                        size,
                        edge_bps: None,
                        threshold_bps,
                        error,
                    });
                    continue;
                }
            };

            if opportunity.adjusted_edge_bps <= threshold_bps {
                debug!(
                    size = %size,
                    route = %opportunity.route,
                    edge_bps = opportunity.adjusted_edge_bps,
                    threshold_bps,
                    "Below threshold"
                );
                decisions.push(DecisionRecord::Skipped {
                    size,
                    edge_bps: Some(opportunity.adjusted_edge_bps),
                    threshold_bps,
                    error: KeeperError::NotProfitable {
                        size,
                        edge_bps: opportunity.adjusted_edge_bps,
                        threshold_bps,
                    },
                });
                continue;
            }

            // Gas is a fixed cost, so a bps edge can clear the threshold at a
            // small size and still lose money.
            if opportunity.estimated_profit <= Decimal::ZERO {
                debug!(
                    size = %size,
                    route = %opportunity.route,
                    edge_bps = opportunity.adjusted_edge_bps,
                    est_profit = %opportunity.estimated_profit.round_dp(2),
                    "Net loss after gas"
                );
                decisions.push(DecisionRecord::Skipped {
                    size,
                    edge_bps: Some(opportunity.adjusted_edge_bps),
                    threshold_bps,
                    error: KeeperError::NetLoss {
                        size,
                        estimated_profit: opportunity.estimated_profit,
                    },
                });
                continue;
            }

            match self.breaker.check(conditions, now) {
                Ok(()) => {
                    info!(
                        size = %size,
                        route = %opportunity.route,
                        edge_bps = opportunity.adjusted_edge_bps,
                        threshold_bps,
                        profit = format!("${:.2}", opportunity.estimated_profit),
                        "Opportunity cleared threshold and breaker"
                    );
                    decisions.push(DecisionRecord::Selected {
                        opportunity,
                        threshold_bps,
                    });
                }
                Err(reason) => {
                    warn!(
                        size = %size,
                        edge_bps = opportunity.adjusted_edge_bps,
                        threshold_bps,
                        reason = %reason,
                        "Circuit breaker rejected opportunity"
                    );
                    decisions.push(DecisionRecord::BreakerRejected {
                        opportunity,
                        threshold_bps,
                        reason,
                    });
                }
            }
            break;
        }

        SelectionPass {
            threshold_bps,
            decisions,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
