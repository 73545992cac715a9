//! Venue integrations.
//!
//! Defines the `QuoteSource` trait implemented by every price venue, and the
//! `QuoteRouter` registry that walks a venue's fee tiers in priority order
//! and fans out probes across venues.

pub mod http;

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{Direction, FeeTier, Pair, PairLeg, Quote, Unavailable, VenueKind};

/// Abstraction over external price venues.
///
/// Implementors quote a single fee tier; tier fallback and timeouts are
/// handled by [`QuoteRouter`]. Quoting is read-only and side-effect free.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Which venue this source prices.
    fn venue(&self) -> VenueKind;

    /// Fee tiers (or routing variants) in the order they should be tried.
    fn fee_tiers(&self) -> Vec<FeeTier>;

    /// Quote an exact-input swap on one tier. Returns the output amount.
    async fn quote_exact_in(
        &self,
        leg: &PairLeg,
        amount_in: u128,
        tier: FeeTier,
    ) -> anyhow::Result<u128>;
}

/// A registered source plus its per-call timeout.
struct VenueEntry {
    source: Arc<dyn QuoteSource>,
    timeout: Duration,
}

/// Registry of enabled venues keyed by [`VenueKind`].
///
/// Unregistered venues answer `Unavailable`, so routes naming a disabled
/// venue simply never resolve.
pub struct QuoteRouter {
    pair: Pair,
    venues: BTreeMap<VenueKind, VenueEntry>,
    /// Registration order doubles as priority order.
    priority: Vec<VenueKind>,
}

impl QuoteRouter {
    pub fn new(pair: Pair) -> Self {
        Self {
            pair,
            venues: BTreeMap::new(),
            priority: Vec::new(),
        }
    }

    /// Register a venue. Re-registering a venue replaces its source but keeps
    /// its original priority slot.
    pub fn register(&mut self, source: Arc<dyn QuoteSource>, timeout: Duration) {
        let venue = source.venue();
        if !self.priority.contains(&venue) {
            self.priority.push(venue);
        }
        self.venues.insert(venue, VenueEntry { source, timeout });
    }

    pub fn pair(&self) -> &Pair {
        &self.pair
    }

    /// Enabled venues, highest priority first.
    pub fn venues(&self) -> &[VenueKind] {
        &self.priority
    }

    pub fn is_enabled(&self, venue: VenueKind) -> bool {
        self.venues.contains_key(&venue)
    }

    /// Quote one leg on one venue, trying each fee tier in order and returning
    /// the first positive answer. Errors, timeouts and zero outputs fall
    /// through to the next tier; no tier is retried.
    pub async fn quote(
        &self,
        venue: VenueKind,
        amount_in: u128,
        direction: Direction,
    ) -> Result<Quote, Unavailable> {
        let entry = self.venues.get(&venue).ok_or_else(|| Unavailable {
            venue,
            reason: "venue not enabled".to_string(),
        })?;

        let leg = self.pair.leg(direction);
        let tiers = entry.source.fee_tiers();
        if tiers.is_empty() {
            return Err(Unavailable {
                venue,
                reason: "no fee tiers configured".to_string(),
            });
        }

        let mut last_reason = String::new();
        for tier in tiers {
            let attempt = tokio::time::timeout(
                entry.timeout,
                entry.source.quote_exact_in(&leg, amount_in, tier),
            )
            .await;

            match attempt {
                Ok(Ok(amount_out)) if amount_out > 0 => {
                    debug!(
                        venue = %venue,
                        tier = %tier,
                        amount_in = %amount_in,
                        amount_out = %amount_out,
                        "Quote received"
                    );
                    return Ok(Quote {
                        venue,
                        direction,
                        amount_in,
                        amount_out,
                        fee_tier: tier,
                    });
                }
                Ok(Ok(_)) => {
                    last_reason = format!("tier {tier} returned zero");
                }
                Ok(Err(e)) => {
                    last_reason = format!("tier {tier} failed: {e}");
                }
                Err(_) => {
                    last_reason = format!("tier {tier} timed out after {:?}", entry.timeout);
                }
            }
            debug!(venue = %venue, reason = %last_reason, "Fee tier unavailable, trying next");
        }

        warn!(venue = %venue, amount_in = %amount_in, reason = %last_reason, "Venue unavailable");
        Err(Unavailable {
            venue,
            reason: last_reason,
        })
    }

    /// Probe several venues concurrently for the same leg and amount.
    /// Results come back in the order the venues were given.
    pub async fn quote_many(
        &self,
        venues: &[VenueKind],
        amount_in: u128,
        direction: Direction,
    ) -> Vec<(VenueKind, Result<Quote, Unavailable>)> {
        let probes = venues.iter().map(|&venue| async move {
            (venue, self.quote(venue, amount_in, direction).await)
        });
        join_all(probes).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
