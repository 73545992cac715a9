//! In-memory venue, settlement and market signals for integration testing.
//!
//! Everything here is deterministic and controllable from test code, with no
//! network access.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use flashloop::engine::events::{ChannelSink, KeeperEvent};
use flashloop::engine::identity::{Assignment, ExecutionIdentity, ExecutionIdentityPool, LocalSequence};
use flashloop::engine::settlement::{Settlement, SettlementError, SubmitReceipt, Submitter, SubmitterConfig};
use flashloop::engine::submission::{SubmissionConfig, SubmissionPlan, SubmissionStrategySelector};
use flashloop::engine::{Keeper, KeeperComponents};
use flashloop::market::{MarketConditionMonitor, MarketConfig, MarketSignals};
use flashloop::strategy::backoff::{BackoffConfig, BackoffController};
use flashloop::strategy::breaker::{BreakerConfig, CircuitBreaker, CircuitBreakerState};
use flashloop::strategy::edge::{EdgeCalculator, EdgeConfig};
use flashloop::strategy::threshold::{AdaptiveThreshold, ThresholdConfig};
use flashloop::strategy::OpportunityGate;
use flashloop::types::*;
use flashloop::venues::{QuoteRouter, QuoteSource};

pub const ASSET: &str = "0xasset";
pub const INTERMEDIATE: &str = "0xweth";

// ---------------------------------------------------------------------------
// Venue
// ---------------------------------------------------------------------------

/// Forward leg passes the amount through 1:1; the reverse leg returns
/// `amount × ratio / 10000`. Tiers in `dead_tiers` always fail.
pub struct MockVenue {
    venue: VenueKind,
    tiers: Vec<FeeTier>,
    dead_tiers: Vec<FeeTier>,
    ratio: Mutex<u128>,
    calls: AtomicUsize,
}

impl MockVenue {
    pub fn new(venue: VenueKind, ratio: u128) -> Self {
        Self {
            venue,
            tiers: vec![FeeTier(500), FeeTier(3000)],
            dead_tiers: Vec::new(),
            ratio: Mutex::new(ratio),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_dead_tiers(mut self, dead: Vec<FeeTier>) -> Self {
        self.dead_tiers = dead;
        self
    }

    pub fn set_ratio(&self, ratio: u128) {
        *self.ratio.lock().unwrap() = ratio;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteSource for MockVenue {
    fn venue(&self) -> VenueKind {
        self.venue
    }

    fn fee_tiers(&self) -> Vec<FeeTier> {
        self.tiers.clone()
    }

    async fn quote_exact_in(&self, leg: &PairLeg, amount_in: u128, tier: FeeTier) -> Result<u128> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.dead_tiers.contains(&tier) {
            return Err(anyhow!("pool for tier {tier} not initialised"));
        }
        if leg.token_in == ASSET {
            Ok(amount_in)
        } else {
            let ratio = *self.ratio.lock().unwrap();
            Ok(amount_in * ratio / 10_000)
        }
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Submission {
    pub size: CandidateSize,
    pub identity: String,
    pub sequence: u64,
    pub channel: SubmissionChannel,
}

/// Records every submission and answers with a fixed result.
pub struct RecordingSettlement {
    confirm: bool,
    realized_loss: Option<Decimal>,
    submissions: Mutex<Vec<Submission>>,
}

impl RecordingSettlement {
    pub fn confirming() -> Self {
        Self {
            confirm: true,
            realized_loss: None,
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn reverting(realized_loss: Option<Decimal>) -> Self {
        Self {
            confirm: false,
            realized_loss,
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Settlement for RecordingSettlement {
    async fn submit(
        &self,
        opportunity: &ArbitrageOpportunity,
        assignment: &Assignment,
        plan: &SubmissionPlan,
        _deadline: DateTime<Utc>,
    ) -> Result<SubmitReceipt, SettlementError> {
        let mut subs = self.submissions.lock().unwrap();
        subs.push(Submission {
            size: opportunity.size,
            identity: assignment.identity.address.clone(),
            sequence: assignment.sequence,
            channel: plan.channel,
        });
        Ok(SubmitReceipt {
            tx_ref: format!("0xtx{}", subs.len()),
            confirmed: self.confirm,
            realized_loss: self.realized_loss,
        })
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

pub struct StaticSignals {
    pub fee_gwei: f64,
    pub contention: u64,
}

#[async_trait]
impl MarketSignals for StaticSignals {
    async fn fee_level(&self) -> Result<f64> {
        Ok(self.fee_gwei)
    }

    async fn contention(&self) -> Result<u64> {
        Ok(self.contention)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub venues: Vec<Arc<MockVenue>>,
    pub routes: Vec<Route>,
    pub sizes: Vec<u128>,
    pub identities: usize,
    pub settlement: Arc<RecordingSettlement>,
    pub breaker: BreakerConfig,
    pub breaker_state: Option<CircuitBreakerState>,
    pub backoff: BackoffConfig,
    pub signals: StaticSignals,
    pub state_path: Option<String>,
    pub edge: EdgeConfig,
}

impl Harness {
    /// One venue, one self-route, one size of 10000, free flash loans and gas.
    /// Set `edge` to `EdgeConfig::default()` for realistic costs.
    pub fn single_venue(ratio: u128) -> Self {
        Self {
            venues: vec![Arc::new(MockVenue::new(VenueKind::UniswapV3, ratio))],
            routes: vec![Route {
                first: VenueKind::UniswapV3,
                second: VenueKind::UniswapV3,
            }],
            sizes: vec![10_000],
            identities: 2,
            settlement: Arc::new(RecordingSettlement::confirming()),
            breaker: BreakerConfig::default(),
            breaker_state: None,
            backoff: BackoffConfig {
                limit: 3,
                pause: Duration::from_secs(300),
            },
            signals: StaticSignals {
                fee_gwei: 10.0,
                contention: 0,
            },
            state_path: None,
            edge: EdgeConfig {
                flash_loan_fee_bps: 0,
                gas_cost: Decimal::ZERO,
                ..EdgeConfig::default()
            },
        }
    }

    pub fn build(self) -> (Keeper, UnboundedReceiver<KeeperEvent>) {
        let pair = Pair {
            asset: ASSET.into(),
            intermediate: INTERMEDIATE.into(),
            symbol: "USDC/WETH".into(),
            decimals: 6,
        };
        let mut router = QuoteRouter::new(pair);
        for venue in &self.venues {
            router.register(venue.clone(), Duration::from_secs(1));
        }
        let calculator = EdgeCalculator::new(router, self.routes, self.edge);

        let breaker = match self.breaker_state {
            Some(state) => CircuitBreaker::with_state(self.breaker, state),
            None => CircuitBreaker::new(self.breaker, Utc::now()),
        };

        let identities = (0..self.identities)
            .map(|i| ExecutionIdentity::new(format!("0x{:040x}", i + 1), None))
            .collect();

        let (sink, rx) = ChannelSink::new();
        let keeper = Keeper::new(KeeperComponents {
            sizes: self.sizes.into_iter().map(CandidateSize).collect(),
            poll_interval: Duration::from_secs(12),
            calculator,
            monitor: MarketConditionMonitor::new(MarketConfig::default()),
            signals: Arc::new(self.signals),
            gate: OpportunityGate::new(AdaptiveThreshold::new(ThresholdConfig::default()), breaker),
            backoff: BackoffController::new(self.backoff),
            pool: ExecutionIdentityPool::new(identities, true).unwrap(),
            sequences: Arc::new(LocalSequence::default()),
            selector: SubmissionStrategySelector::new(SubmissionConfig::default()),
            submitter: Submitter::new(
                self.settlement,
                SubmitterConfig {
                    deadline: Duration::from_secs(30),
                    failure_loss_estimate: Decimal::from(20),
                },
            ),
            events: Arc::new(sink),
            state_path: self.state_path,
        });
        (keeper, rx)
    }
}

pub fn drain(rx: &mut UnboundedReceiver<KeeperEvent>) -> Vec<KeeperEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}
