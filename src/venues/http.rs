//! JSON quote endpoint adapter.
//!
//! Each venue is fronted by a small quoting service (a QuoterV2 /
//! `getAmountsOut` wrapper) that accepts an exact-input request and answers
//! with the output amount. Amounts travel as decimal strings so 256-bit
//! values survive JSON.
//!
//! Request:  `POST {endpoint}` `{"venue","tokenIn","tokenOut","amountIn","feeTier"}`
//! Response: `{"amountOut": "123"}` or `{"error": "..."}`

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::QuoteSource;
use crate::types::{FeeTier, PairLeg, VenueKind};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRequest<'a> {
    venue: &'a str,
    token_in: &'a str,
    token_out: &'a str,
    amount_in: String,
    fee_tier: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    #[serde(default)]
    amount_out: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Quote source backed by an HTTP quoting service.
pub struct HttpQuoteSource {
    venue: VenueKind,
    endpoint: String,
    tiers: Vec<FeeTier>,
    client: Client,
}

impl HttpQuoteSource {
    pub fn new(venue: VenueKind, endpoint: String, tiers: Vec<FeeTier>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            venue,
            endpoint,
            tiers,
            client,
        })
    }
}

/// Extract the output amount from a quote response body.
fn parse_quote_response(body: QuoteResponse) -> Result<u128> {
    if let Some(err) = body.error {
        return Err(anyhow!("quote service error: {err}"));
    }
    let raw = body
        .amount_out
        .ok_or_else(|| anyhow!("quote response missing amountOut"))?;
    raw.trim()
        .parse::<u128>()
        .with_context(|| format!("invalid amountOut: {raw}"))
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    fn venue(&self) -> VenueKind {
        self.venue
    }

    fn fee_tiers(&self) -> Vec<FeeTier> {
        self.tiers.clone()
    }

    async fn quote_exact_in(&self, leg: &PairLeg, amount_in: u128, tier: FeeTier) -> Result<u128> {
        let request = QuoteRequest {
            venue: self.venue.as_str(),
            token_in: &leg.token_in,
            token_out: &leg.token_out,
            amount_in: amount_in.to_string(),
            fee_tier: tier.0,
        };

        let body: QuoteResponse = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("{} quote request failed", self.venue))?
            .error_for_status()
            .with_context(|| format!("{} quote service returned error status", self.venue))?
            .json()
            .await
            .with_context(|| format!("{} quote response not JSON", self.venue))?;

        parse_quote_response(body)
    }
}
