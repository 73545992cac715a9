//! Round-trip edge calculation.
//!
//! Quotes each candidate size across the configured routes, computes the
//! raw edge in basis points with integer arithmetic, applies the slippage
//! cap, and folds flash-loan fee and gas into the adjusted edge.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::types::{
    units_to_decimal, ArbitrageOpportunity, CandidateSize, Direction, KeeperError, Quote, Route,
    VenueKind,
};
use crate::venues::QuoteRouter;

const BPS: u128 = 10_000;

// ---------------------------------------------------------------------------
// Configuration (defaults, overridden by config.toml at runtime)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Candidates with |raw edge| above this are treated as bad quotes.
    pub max_slippage_bps: i64,
    /// Safety margin subtracted from the raw edge.
    pub slippage_buffer_bps: i64,
    /// Flash-loan premium charged on the borrowed size.
    pub flash_loan_fee_bps: i64,
    /// Estimated gas cost of one execution, in quote currency.
    pub gas_cost: Decimal,
    /// Price of one asset unit in quote currency (1 for USD stables).
    pub asset_price: Decimal,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: 500,
            slippage_buffer_bps: 0,
            flash_loan_fee_bps: 9,
            gas_cost: dec!(20),
            asset_price: Decimal::ONE,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge arithmetic
// ---------------------------------------------------------------------------

/// `(amount_out - amount_in) * 10000 / amount_in`, truncated toward zero.
///
/// Exact for any amounts where `|out - in| * 10000` fits in a u128.
pub fn edge_bps(amount_in: u128, amount_out: u128) -> i64 {
    if amount_in == 0 {
        return 0;
    }
    let (diff, negative) = if amount_out >= amount_in {
        (amount_out - amount_in, false)
    } else {
        (amount_in - amount_out, true)
    };
    let magnitude = match diff.checked_mul(BPS) {
        Some(scaled) => scaled / amount_in,
        None => (diff / amount_in).saturating_mul(BPS),
    };
    let magnitude = i64::try_from(magnitude).unwrap_or(i64::MAX);
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

fn signed_diff(amount_out: u128, amount_in: u128) -> i128 {
    let out = i128::try_from(amount_out).unwrap_or(i128::MAX);
    let inp = i128::try_from(amount_in).unwrap_or(i128::MAX);
    out.saturating_sub(inp)
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Quotes candidate sizes over ordered routes and produces opportunities.
pub struct EdgeCalculator {
    router: QuoteRouter,
    routes: Vec<Route>,
    config: EdgeConfig,
}

impl EdgeCalculator {
    /// `routes` are tried in order; the first is the primary route and the
    /// rest are fallbacks.
    pub fn new(router: QuoteRouter, routes: Vec<Route>, config: EdgeConfig) -> Self {
        Self {
            router,
            routes,
            config,
        }
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn router(&self) -> &QuoteRouter {
        &self.router
    }

    /// Quote one candidate size round trip.
    ///
    /// First legs for every route are probed concurrently; routes are then
    /// walked in order and the first one whose second leg also resolves wins.
    /// Returns `Unavailable` only when every route fails, and
    /// `SlippageExceeded` when the winning route's edge is implausibly large.
    pub async fn evaluate(&self, size: CandidateSize) -> Result<ArbitrageOpportunity, KeeperError> {
        if self.routes.is_empty() {
            return Err(KeeperError::Unavailable {
                size,
                reason: "no routes configured".to_string(),
            });
        }

        let mut first_venues: Vec<VenueKind> = Vec::new();
        for route in &self.routes {
            if !first_venues.contains(&route.first) {
                first_venues.push(route.first);
            }
        }

        let first_legs = self
            .router
            .quote_many(&first_venues, size.amount(), Direction::Forward)
            .await;

        let mut reasons: Vec<String> = Vec::new();
        for route in &self.routes {
            let first = match first_legs.iter().find(|(venue, _)| *venue == route.first) {
                Some((_, Ok(quote))) => quote.clone(),
                Some((_, Err(e))) => {
                    let reason = e.to_string();
                    if !reasons.contains(&reason) {
                        reasons.push(reason);
                    }
                    continue;
                }
                None => continue,
            };

            match self
                .router
                .quote(route.second, first.amount_out, Direction::Reverse)
                .await
            {
                Ok(second) => return self.build_opportunity(size, *route, first, second),
                Err(e) => {
                    debug!(size = %size, route = %route, error = %e, "Route failed, trying fallback");
                    let reason = e.to_string();
                    if !reasons.contains(&reason) {
                        reasons.push(reason);
                    }
                }
            }
        }

        Err(KeeperError::Unavailable {
            size,
            reason: reasons.join("; "),
        })
    }

    /// Turn two resolved legs into an opportunity, enforcing the slippage cap.
    pub fn build_opportunity(
        &self,
        size: CandidateSize,
        route: Route,
        first_leg: Quote,
        second_leg: Quote,
    ) -> Result<ArbitrageOpportunity, KeeperError> {
        let pair = self.router.pair();
        let amount_in = size.amount();
        let amount_out = second_leg.amount_out;

        let raw_edge_bps = edge_bps(amount_in, amount_out);
        let slippage_bps = raw_edge_bps.saturating_abs();
        if slippage_bps > self.config.max_slippage_bps {
            return Err(KeeperError::SlippageExceeded {
                size,
                slippage_bps,
                max_bps: self.config.max_slippage_bps,
            });
        }

        let adjusted_edge_bps = raw_edge_bps
            .saturating_sub(self.config.flash_loan_fee_bps)
            .saturating_sub(self.config.slippage_buffer_bps);

        let price = self.config.asset_price;
        let gross = units_to_decimal(signed_diff(amount_out, amount_in), pair.decimals) * price;
        let borrowed = units_to_decimal(signed_diff(amount_in, 0), pair.decimals) * price;
        let flash_fee = borrowed * Decimal::from(self.config.flash_loan_fee_bps) / dec!(10000);
        let estimated_profit = gross - flash_fee - self.config.gas_cost;

        debug!(
            size = %size,
            route = %route,
            raw_edge_bps,
            adjusted_edge_bps,
            est_profit = %estimated_profit.round_dp(2),
            "Round trip quoted"
        );

        Ok(ArbitrageOpportunity {
            pair: pair.symbol.clone(),
            size,
            route,
            first_leg,
            second_leg,
            raw_edge_bps,
            adjusted_edge_bps,
            estimated_profit,
            found_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
