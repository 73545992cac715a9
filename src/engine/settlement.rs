//! Settlement boundary.
//!
//! The `Settlement` trait hands a quoted round trip to whatever submits the
//! atomic flash-loan transaction. `HttpSettlement` talks to a JSON signing
//! relay; `DryRunSettlement` only logs. `Submitter` walks the channel
//! fallback chain under an overall deadline and produces the terminal
//! [`TradeOutcome`].

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::identity::Assignment;
use super::submission::SubmissionPlan;
use crate::types::{ArbitrageOpportunity, SubmissionChannel, TradeOutcome};

// ---------------------------------------------------------------------------
// Boundary types
// ---------------------------------------------------------------------------

/// What the settlement layer reports once a submission is terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReceipt {
    pub tx_ref: String,
    /// Included and succeeded on chain.
    pub confirmed: bool,
    /// Loss measured by the settlement layer, when it knows it.
    pub realized_loss: Option<Decimal>,
}

/// A channel could not take the submission. The caller may try the next
/// channel in the chain.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettlementError {
    #[error("{channel} channel rejected submission: {reason}")]
    Rejected {
        channel: SubmissionChannel,
        reason: String,
    },

    #[error("settlement transport error: {0}")]
    Transport(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Settlement: Send + Sync {
    async fn submit(
        &self,
        opportunity: &ArbitrageOpportunity,
        assignment: &Assignment,
        plan: &SubmissionPlan,
        deadline: DateTime<Utc>,
    ) -> Result<SubmitReceipt, SettlementError>;
}

// ---------------------------------------------------------------------------
// HTTP relay
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    pair: &'a str,
    amount_in: String,
    expected_amount_out: String,
    first_venue: &'a str,
    first_fee_tier: u32,
    second_venue: &'a str,
    second_fee_tier: u32,
    from: &'a str,
    nonce: u64,
    channel: SubmissionChannel,
    fee_bump_pct: u32,
    /// Unix seconds after which the transaction must not execute.
    deadline: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayResponse {
    #[serde(default)]
    tx_hash: Option<String>,
    /// "confirmed" | "reverted"
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    realized_loss: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn build_relay_request<'a>(
    opportunity: &'a ArbitrageOpportunity,
    assignment: &'a Assignment,
    plan: &SubmissionPlan,
    deadline: DateTime<Utc>,
) -> RelayRequest<'a> {
    RelayRequest {
        pair: &opportunity.pair,
        amount_in: opportunity.size.amount().to_string(),
        expected_amount_out: opportunity.amount_out().to_string(),
        first_venue: opportunity.route.first.as_str(),
        first_fee_tier: opportunity.first_leg.fee_tier.0,
        second_venue: opportunity.route.second.as_str(),
        second_fee_tier: opportunity.second_leg.fee_tier.0,
        from: &assignment.identity.address,
        nonce: assignment.sequence,
        channel: plan.channel,
        fee_bump_pct: plan.fee_bump_pct,
        deadline: deadline.timestamp(),
    }
}

fn parse_relay_response(
    channel: SubmissionChannel,
    body: RelayResponse,
) -> Result<SubmitReceipt, SettlementError> {
    if let Some(reason) = body.error {
        return Err(SettlementError::Rejected { channel, reason });
    }
    let tx_ref = body.tx_hash.ok_or_else(|| SettlementError::Rejected {
        channel,
        reason: "relay response missing txHash".to_string(),
    })?;
    let confirmed = matches!(body.status.as_deref(), Some("confirmed"));
    let realized_loss = body
        .realized_loss
        .as_deref()
        .and_then(|s| Decimal::from_str(s.trim()).ok());
    Ok(SubmitReceipt {
        tx_ref,
        confirmed,
        realized_loss,
    })
}

/// Settlement through a JSON signing relay.
pub struct HttpSettlement {
    url: String,
    client: Client,
}

impl HttpSettlement {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl Settlement for HttpSettlement {
    async fn submit(
        &self,
        opportunity: &ArbitrageOpportunity,
        assignment: &Assignment,
        plan: &SubmissionPlan,
        deadline: DateTime<Utc>,
    ) -> Result<SubmitReceipt, SettlementError> {
        let request = build_relay_request(opportunity, assignment, plan, deadline);

        let mut call = self.client.post(&self.url).json(&request);
        if let Some(credential) = assignment.identity.credential() {
            call = call.bearer_auth(credential.expose_secret());
        }

        let response = call
            .send()
            .await
            .map_err(|e| SettlementError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SettlementError::Rejected {
                channel: plan.channel,
                reason: format!("relay returned {status}: {text}"),
            });
        }

        let body: RelayResponse = response
            .json()
            .await
            .map_err(|e| SettlementError::Transport(format!("invalid relay response: {e}")))?;

        parse_relay_response(plan.channel, body)
    }
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

/// Logs the submission and reports it confirmed without touching the chain.
#[derive(Debug, Default)]
pub struct DryRunSettlement;

#[async_trait]
impl Settlement for DryRunSettlement {
    async fn submit(
        &self,
        opportunity: &ArbitrageOpportunity,
        assignment: &Assignment,
        plan: &SubmissionPlan,
        deadline: DateTime<Utc>,
    ) -> Result<SubmitReceipt, SettlementError> {
        info!(
            pair = %opportunity.pair,
            size = %opportunity.size,
            route = %opportunity.route,
            edge_bps = opportunity.adjusted_edge_bps,
            from = %assignment.identity.address,
            nonce = assignment.sequence,
            channel = %plan.channel,
            deadline = %deadline,
            "[DRY RUN] Would submit flash-loan round trip"
        );
        Ok(SubmitReceipt {
            tx_ref: format!("dry-run-{}", uuid::Uuid::new_v4()),
            confirmed: true,
            realized_loss: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Upper bound on one whole submission, all fallbacks included.
    pub deadline: Duration,
    /// Loss assumed for a failed on-chain attempt when the settlement layer
    /// reports none (typically the gas estimate).
    pub failure_loss_estimate: Decimal,
}

pub struct Submitter {
    settlement: Arc<dyn Settlement>,
    config: SubmitterConfig,
}

impl Submitter {
    pub fn new(settlement: Arc<dyn Settlement>, config: SubmitterConfig) -> Self {
        Self { settlement, config }
    }

    /// Try each plan in order until one channel accepts. Always returns a
    /// terminal outcome; never panics or propagates.
    pub async fn submit(
        &self,
        opportunity: &ArbitrageOpportunity,
        assignment: &Assignment,
        plans: &[SubmissionPlan],
    ) -> TradeOutcome {
        let deadline_at = Utc::now()
            + chrono::Duration::from_std(self.config.deadline)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let attempt = tokio::time::timeout(
            self.config.deadline,
            self.walk_chain(opportunity, assignment, plans, deadline_at),
        )
        .await;

        let mut outcome = TradeOutcome {
            opportunity: opportunity.clone(),
            identity: assignment.identity.address.clone(),
            sequence: assignment.sequence,
            channel: None,
            success: false,
            tx_ref: None,
            loss: Decimal::ZERO,
            error: None,
        };

        match attempt {
            Ok(Ok((channel, receipt))) => {
                outcome.channel = Some(channel);
                outcome.tx_ref = Some(receipt.tx_ref);
                outcome.success = receipt.confirmed;
                if !receipt.confirmed {
                    outcome.loss = receipt
                        .realized_loss
                        .unwrap_or(self.config.failure_loss_estimate);
                    outcome.error = Some("transaction not confirmed".to_string());
                }
            }
            Ok(Err(last_error)) => {
                // Nothing was accepted, so nothing was spent.
                outcome.error = Some(last_error);
            }
            Err(_) => {
                outcome.loss = self.config.failure_loss_estimate;
                outcome.error = Some(format!(
                    "submission deadline of {:?} exceeded",
                    self.config.deadline
                ));
            }
        }

        if outcome.success {
            info!(outcome = %outcome, "Execution confirmed");
        } else {
            warn!(
                outcome = %outcome,
                loss = %outcome.loss,
                error = outcome.error.as_deref().unwrap_or("-"),
                "Execution failed"
            );
        }
        outcome
    }

    async fn walk_chain(
        &self,
        opportunity: &ArbitrageOpportunity,
        assignment: &Assignment,
        plans: &[SubmissionPlan],
        deadline: DateTime<Utc>,
    ) -> Result<(SubmissionChannel, SubmitReceipt), String> {
        let mut last_error = "no submission channels planned".to_string();
        for plan in plans {
            match self
                .settlement
                .submit(opportunity, assignment, plan, deadline)
                .await
            {
                Ok(receipt) => return Ok((plan.channel, receipt)),
                Err(e) => {
                    debug!(channel = %plan.channel, error = %e, "Channel failed, falling back");
                    last_error = e.to_string();
                }
            }
        }
        Err(last_error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
