//! Opportunity loop.
//!
//! Drives one polling cycle: sample the market, gate every candidate size
//! through edge → threshold → breaker, execute the first that passes via the
//! identity pool and submission chain, then feed the result back into the
//! breaker and the backoff controller.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::events::{EventSink, KeeperEvent};
use super::identity::{ExecutionIdentityPool, SequenceSource};
use super::report::{log_cycle_report, CycleOutcome, CycleReport};
use super::settlement::Submitter;
use super::submission::SubmissionStrategySelector;
use crate::market::{MarketConditionMonitor, MarketConditions, MarketSignals};
use crate::storage;
use crate::strategy::backoff::BackoffController;
use crate::strategy::breaker::{BreakerStatus, CircuitBreakerState};
use crate::strategy::edge::EdgeCalculator;
use crate::strategy::{DecisionRecord, OpportunityGate, SelectionPass};
use crate::types::{ArbitrageOpportunity, CandidateSize, KeeperError};

/// Everything the loop needs, assembled by the caller.
pub struct KeeperComponents {
    pub sizes: Vec<CandidateSize>,
    pub poll_interval: Duration,
    pub calculator: EdgeCalculator,
    pub monitor: MarketConditionMonitor,
    pub signals: Arc<dyn MarketSignals>,
    pub gate: OpportunityGate,
    pub backoff: BackoffController,
    pub pool: ExecutionIdentityPool,
    pub sequences: Arc<dyn SequenceSource>,
    pub selector: SubmissionStrategySelector,
    pub submitter: Submitter,
    pub events: Arc<dyn EventSink>,
    /// Where breaker state is persisted after every cycle.
    pub state_path: Option<String>,
}

pub struct Keeper {
    sizes: Vec<CandidateSize>,
    poll_interval: Duration,
    calculator: EdgeCalculator,
    monitor: MarketConditionMonitor,
    signals: Arc<dyn MarketSignals>,
    gate: OpportunityGate,
    backoff: BackoffController,
    pool: ExecutionIdentityPool,
    sequences: Arc<dyn SequenceSource>,
    selector: SubmissionStrategySelector,
    submitter: Submitter,
    events: Arc<dyn EventSink>,
    state_path: Option<String>,
    cycle: u64,
}

impl Keeper {
    pub fn new(c: KeeperComponents) -> Self {
        Self {
            sizes: c.sizes,
            poll_interval: c.poll_interval,
            calculator: c.calculator,
            monitor: c.monitor,
            signals: c.signals,
            gate: c.gate,
            backoff: c.backoff,
            pool: c.pool,
            sequences: c.sequences,
            selector: c.selector,
            submitter: c.submitter,
            events: c.events,
            state_path: c.state_path,
            cycle: 0,
        }
    }

    pub fn breaker_state(&self) -> &CircuitBreakerState {
        self.gate.breaker().state()
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.gate.breaker().status(Utc::now())
    }

    pub fn backoff_count(&self) -> u32 {
        self.backoff.consecutive()
    }

    pub fn conditions(&self) -> &MarketConditions {
        self.monitor.conditions()
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Operator reset for the emergency halt.
    pub fn clear_emergency_halt(&mut self, operator: &str) {
        self.gate.breaker_mut().clear_emergency_halt(operator);
        self.persist();
    }

    /// Evaluate every size once and execute at most one opportunity.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;

        self.monitor.sample(self.signals.as_ref()).await;
        let conditions = self.monitor.conditions().clone();

        let pass = self
            .gate
            .select(&self.calculator, &self.sizes, &conditions, Utc::now())
            .await;
        self.emit_decisions(&pass);

        let outcome = match pass.selected() {
            Some(opportunity) => {
                let opportunity = opportunity.clone();
                self.execute(&opportunity, &conditions).await
            }
            None => match pass.breaker_rejection() {
                Some(reason) => CycleOutcome::BreakerRejected(reason),
                None => CycleOutcome::NoOpportunity,
            },
        };

        let opportunities_found = pass
            .decisions
            .iter()
            .filter(|d| !matches!(d, DecisionRecord::Skipped { .. }))
            .count();

        let breaker = self.gate.breaker();
        CycleReport {
            cycle_number: self.cycle,
            sizes_evaluated: pass.decisions.len(),
            opportunities_found,
            best_edge_bps: pass.best_edge_bps(),
            threshold_bps: pass.threshold_bps,
            outcome,
            breaker_status: breaker.status(Utc::now()),
            daily_loss: breaker.state().daily_loss,
            fee_level_gwei: conditions.fee_level_gwei,
            volatility: conditions.volatility,
            competition: conditions.competition,
            timestamp: Utc::now(),
        }
    }

    fn emit_decisions(&self, pass: &SelectionPass) {
        for decision in &pass.decisions {
            match decision {
                DecisionRecord::Skipped {
                    size,
                    edge_bps,
                    threshold_bps,
                    error,
                } => self.events.emit(&KeeperEvent::OpportunitySkipped {
                    size: *size,
                    edge_bps: *edge_bps,
                    threshold_bps: *threshold_bps,
                    reason: error.to_string(),
                }),
                DecisionRecord::Selected {
                    opportunity,
                    threshold_bps,
                } => self.events.emit(&KeeperEvent::found(opportunity, *threshold_bps)),
                DecisionRecord::BreakerRejected {
                    opportunity,
                    threshold_bps,
                    reason,
                } => {
                    self.events.emit(&KeeperEvent::found(opportunity, *threshold_bps));
                    self.events.emit(&KeeperEvent::OpportunitySkipped {
                        size: opportunity.size,
                        edge_bps: Some(opportunity.adjusted_edge_bps),
                        threshold_bps: *threshold_bps,
                        reason: KeeperError::BreakerRejected(*reason).to_string(),
                    });
                }
            }
        }
    }

    async fn execute(
        &mut self,
        opportunity: &ArbitrageOpportunity,
        conditions: &MarketConditions,
    ) -> CycleOutcome {
        let assignment = match self.pool.select(self.sequences.as_ref()).await {
            Ok(a) => a,
            Err(e) => {
                warn!(size = %opportunity.size, error = %e, "Could not assign execution identity");
                self.record_failure(rust_decimal::Decimal::ZERO);
                return CycleOutcome::ExecutionError(e.to_string());
            }
        };

        let plans = self.selector.plan(conditions.competition);
        let outcome = self.submitter.submit(opportunity, &assignment, &plans).await;
        self.pool.release(&assignment);

        if outcome.success {
            self.gate.breaker_mut().record_success();
        } else {
            self.record_failure(outcome.loss);
        }
        self.events.emit(&KeeperEvent::executed(&outcome));

        CycleOutcome::Executed(outcome)
    }

    fn record_failure(&mut self, loss: rust_decimal::Decimal) {
        let now = Utc::now();
        let before = self.gate.breaker().status(now);
        let over_limit_before = self.gate.breaker().daily_loss_exceeded();
        self.gate.breaker_mut().record_failure(loss, now);
        let after = self.gate.breaker().status(now);
        if !over_limit_before && self.gate.breaker().daily_loss_exceeded() {
            let breaker = self.gate.breaker();
            self.events.emit(&KeeperEvent::BreakerTripped {
                reason: format!(
                    "daily loss {} exceeds limit {}",
                    breaker.state().daily_loss,
                    breaker.config().max_daily_loss
                ),
            });
        }
        if after != before {
            let breaker = self.gate.breaker();
            let reason = match after {
                BreakerStatus::EmergencyHalt => breaker
                    .state()
                    .halt_reason
                    .clone()
                    .unwrap_or_else(|| "emergency halt".to_string()),
                _ => format!(
                    "{} consecutive failures, cooling down",
                    breaker.state().consecutive_failures
                ),
            };
            self.events.emit(&KeeperEvent::BreakerTripped { reason });
        }
    }

    /// Feed a finished cycle into the backoff controller. Returns true when
    /// the loop should pause.
    pub fn record_backoff(&mut self, report: &CycleReport) -> bool {
        if report.outcome.is_success() {
            self.backoff.record_success();
            return false;
        }
        let engage = self.backoff.record_non_actionable();
        if engage {
            self.events.emit(&KeeperEvent::BackoffEngaged {
                cycles: self.backoff.consecutive(),
                pause_secs: self.backoff.config().pause.as_secs(),
            });
        }
        engage
    }

    /// Sleep out the backoff pause and reset the counter.
    pub async fn pause(&mut self) {
        self.backoff.engage().await;
    }

    /// One full cycle including backoff and persistence.
    pub async fn step(&mut self) -> CycleReport {
        let report = self.run_cycle().await;
        log_cycle_report(&report);
        self.persist();
        if self.record_backoff(&report) {
            self.pause().await;
        }
        report
    }

    fn persist(&self) {
        if let Some(path) = self.state_path.as_deref() {
            if let Err(e) = storage::save_breaker_state(self.breaker_state(), Some(path)) {
                error!(error = %e, "Failed to save breaker state");
            }
        }
    }

    /// Poll until `shutdown` resolves. Shutdown interrupts the poll interval
    /// and a backoff pause, but never a cycle in progress.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_secs = self.poll_interval.as_secs(),
            sizes = self.sizes.len(),
            venues = self.calculator.router().venues().len(),
            identities = self.pool.len(),
            "Entering main loop. Press Ctrl+C to stop."
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
                _ = interval.tick() => {}
            }

            let report = self.run_cycle().await;
            log_cycle_report(&report);
            self.persist();

            if self.record_backoff(&report) {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Shutdown signal received during backoff.");
                        break;
                    }
                    _ = self.backoff.engage() => {}
                }
                interval.reset();
            }
        }

        self.persist();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
