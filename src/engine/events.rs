//! Keeper events.
//!
//! The core loop reports what it decided through an [`EventSink`]. Sinks are
//! synchronous and must not block: the loop never waits on delivery.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::{ArbitrageOpportunity, CandidateSize, Route, SubmissionChannel, TradeOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KeeperEvent {
    OpportunityFound {
        pair: String,
        size: CandidateSize,
        route: Route,
        edge_bps: i64,
        threshold_bps: i64,
        estimated_profit: Decimal,
    },
    OpportunityExecuted {
        pair: String,
        size: CandidateSize,
        route: Route,
        identity: String,
        sequence: u64,
        channel: Option<SubmissionChannel>,
        success: bool,
        tx_ref: Option<String>,
        loss: Decimal,
        error: Option<String>,
    },
    OpportunitySkipped {
        size: CandidateSize,
        edge_bps: Option<i64>,
        threshold_bps: i64,
        reason: String,
    },
    BreakerTripped {
        reason: String,
    },
    BackoffEngaged {
        cycles: u32,
        pause_secs: u64,
    },
}

impl KeeperEvent {
    pub fn found(opportunity: &ArbitrageOpportunity, threshold_bps: i64) -> Self {
        KeeperEvent::OpportunityFound {
            pair: opportunity.pair.clone(),
            size: opportunity.size,
            route: opportunity.route,
            edge_bps: opportunity.adjusted_edge_bps,
            threshold_bps,
            estimated_profit: opportunity.estimated_profit,
        }
    }

    pub fn executed(outcome: &TradeOutcome) -> Self {
        KeeperEvent::OpportunityExecuted {
            pair: outcome.opportunity.pair.clone(),
            size: outcome.opportunity.size,
            route: outcome.opportunity.route,
            identity: outcome.identity.clone(),
            sequence: outcome.sequence,
            channel: outcome.channel,
            success: outcome.success,
            tx_ref: outcome.tx_ref.clone(),
            loss: outcome.loss,
            error: outcome.error.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeeperEvent::OpportunityFound { .. } => "opportunity_found",
            KeeperEvent::OpportunityExecuted { .. } => "opportunity_executed",
            KeeperEvent::OpportunitySkipped { .. } => "opportunity_skipped",
            KeeperEvent::BreakerTripped { .. } => "breaker_tripped",
            KeeperEvent::BackoffEngaged { .. } => "backoff_engaged",
        }
    }
}

/// Timestamped wire form written by the JSON-lines writer.
#[derive(Serialize)]
struct EventLine<'a> {
    ts: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a KeeperEvent,
}

pub fn to_json_line(event: &KeeperEvent, ts: DateTime<Utc>) -> Result<String> {
    let mut line = serde_json::to_string(&EventLine { ts, event })
        .context("Failed to serialise keeper event")?;
    line.push('\n');
    Ok(line)
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &KeeperEvent);
}

/// Structured log line per event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &KeeperEvent) {
        match event {
            KeeperEvent::OpportunityFound {
                size,
                route,
                edge_bps,
                threshold_bps,
                estimated_profit,
                ..
            } => info!(
                size = %size,
                route = %route,
                edge_bps,
                threshold_bps,
                profit = format!("${:.2}", estimated_profit),
                "Opportunity found"
            ),
            KeeperEvent::OpportunityExecuted {
                size,
                identity,
                sequence,
                success,
                tx_ref,
                loss,
                ..
            } => info!(
                size = %size,
                identity = %identity,
                sequence,
                success,
                tx = tx_ref.as_deref().unwrap_or("-"),
                loss = %loss,
                "Opportunity executed"
            ),
            KeeperEvent::OpportunitySkipped {
                size,
                edge_bps,
                threshold_bps,
                reason,
            } => debug!(
                size = %size,
                edge_bps = ?edge_bps,
                threshold_bps,
                reason = %reason,
                "Opportunity skipped"
            ),
            KeeperEvent::BreakerTripped { reason } => {
                warn!(reason = %reason, "Circuit breaker tripped")
            }
            KeeperEvent::BackoffEngaged { cycles, pause_secs } => {
                warn!(cycles, pause_secs, "Backoff engaged")
            }
        }
    }
}

/// Forwards events into an unbounded channel for an async consumer.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<KeeperEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<KeeperEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &KeeperEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!(event = event.name(), "Event consumer gone, dropping event");
        }
    }
}

/// Delivers each event to every inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &KeeperEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Append each received event to `path` as one JSON object per line. Ends
/// when every sender has been dropped.
pub fn spawn_jsonl_writer(
    mut rx: mpsc::UnboundedReceiver<KeeperEvent>,
    path: String,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open event log {path}"))?;

        while let Some(event) = rx.recv().await {
            let line = to_json_line(&event, Utc::now())?;
            if let Err(e) = file.write_all(line.as_bytes()).await {
                warn!(path = %path, error = %e, "Failed to write event");
            }
        }
        file.flush().await.context("Failed to flush event log")?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
