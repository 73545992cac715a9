//! Shared types for the FLASHLOOP keeper.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that venue, strategy,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Venues
// ---------------------------------------------------------------------------

/// External venue capable of pricing a leg of the traded pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    UniswapV3,
    UniswapV2,
    #[serde(rename = "sushiswap")]
    SushiSwap,
    #[serde(rename = "pancakeswap")]
    PancakeSwap,
    Curve,
}

impl VenueKind {
    /// All known venues (useful for iteration).
    pub const ALL: &'static [VenueKind] = &[
        VenueKind::UniswapV3,
        VenueKind::UniswapV2,
        VenueKind::SushiSwap,
        VenueKind::PancakeSwap,
        VenueKind::Curve,
    ];

    /// Stable identifier used in logs, events and wire requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueKind::UniswapV3 => "uniswap_v3",
            VenueKind::UniswapV2 => "uniswap_v2",
            VenueKind::SushiSwap => "sushiswap",
            VenueKind::PancakeSwap => "pancakeswap",
            VenueKind::Curve => "curve",
        }
    }
}

impl fmt::Display for VenueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a venue name (case-insensitive, a few common aliases).
impl std::str::FromStr for VenueKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uniswap_v3" | "univ3" | "v3" => Ok(VenueKind::UniswapV3),
            "uniswap_v2" | "univ2" | "v2" => Ok(VenueKind::UniswapV2),
            "sushiswap" | "sushi" => Ok(VenueKind::SushiSwap),
            "pancakeswap" | "pancake" => Ok(VenueKind::PancakeSwap),
            "curve" => Ok(VenueKind::Curve),
            _ => Err(anyhow::anyhow!("Unknown venue: {s}")),
        }
    }
}

/// Fee tier in hundredths of a basis point (Uniswap convention: 500 = 0.05%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeeTier(pub u32);

impl fmt::Display for FeeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Pair & legs
// ---------------------------------------------------------------------------

/// Which half of the round trip a quote prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// asset → intermediate
    Forward,
    /// intermediate → asset
    Reverse,
}

/// One swap leg: token addresses in and out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairLeg {
    pub token_in: String,
    pub token_out: String,
}

/// The traded pair. The asset is borrowed and returned; the intermediate is
/// held only between the two legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub asset: String,
    pub intermediate: String,
    /// Human label, e.g. "USDC/WETH".
    pub symbol: String,
    /// Asset decimals (USDC = 6, WETH = 18).
    pub decimals: u32,
}

impl Pair {
    pub fn leg(&self, direction: Direction) -> PairLeg {
        match direction {
            Direction::Forward => PairLeg {
                token_in: self.asset.clone(),
                token_out: self.intermediate.clone(),
            },
            Direction::Reverse => PairLeg {
                token_in: self.intermediate.clone(),
                token_out: self.asset.clone(),
            },
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// Trial input amount, in asset base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateSize(pub u128);

impl CandidateSize {
    pub fn amount(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for CandidateSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Largest supported asset precision.
pub const MAX_DECIMALS: u32 = 18;

/// Convert a human amount ("5000", "0.5") into base units.
///
/// Rejects non-positive values and amounts with more fractional digits than
/// the asset supports.
pub fn parse_units(amount: &str, decimals: u32) -> Result<u128, KeeperError> {
    if decimals > MAX_DECIMALS {
        return Err(KeeperError::Configuration(format!(
            "decimals {decimals} exceeds maximum {MAX_DECIMALS}"
        )));
    }
    let value = Decimal::from_str(amount.trim()).map_err(|e| {
        KeeperError::Configuration(format!("invalid amount '{amount}': {e}"))
    })?;
    if value <= Decimal::ZERO {
        return Err(KeeperError::Configuration(format!(
            "amount must be positive: '{amount}'"
        )));
    }
    let scale = Decimal::from(10u64.pow(decimals));
    let scaled = value.checked_mul(scale).ok_or_else(|| {
        KeeperError::Configuration(format!("amount '{amount}' overflows"))
    })?;
    if !scaled.fract().is_zero() {
        return Err(KeeperError::Configuration(format!(
            "amount '{amount}' has more than {decimals} decimals"
        )));
    }
    scaled.to_u128().ok_or_else(|| {
        KeeperError::Configuration(format!("amount '{amount}' out of range"))
    })
}

/// Convert a signed base-unit amount to human units.
pub fn units_to_decimal(value: i128, decimals: u32) -> Decimal {
    Decimal::try_from_i128_with_scale(value, decimals.min(MAX_DECIMALS)).unwrap_or(
        if value < 0 { Decimal::MIN } else { Decimal::MAX },
    )
}

// ---------------------------------------------------------------------------
// Quotes & opportunities
// ---------------------------------------------------------------------------

/// A successful quote from one venue for one leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub venue: VenueKind,
    pub direction: Direction,
    pub amount_in: u128,
    pub amount_out: u128,
    pub fee_tier: FeeTier,
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} tier={}] {} -> {}",
            self.venue, self.fee_tier, self.amount_in, self.amount_out
        )
    }
}

/// Round-trip path: first leg on one venue, second leg on another (or the same).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub first: VenueKind,
    pub second: VenueKind,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.first, self.second)
    }
}

/// A fully quoted round trip, ready for threshold and breaker checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub pair: String,
    pub size: CandidateSize,
    pub route: Route,
    pub first_leg: Quote,
    pub second_leg: Quote,
    /// (out - in) * 10000 / in, truncated toward zero.
    pub raw_edge_bps: i64,
    /// Raw edge less flash-loan fee and slippage buffer.
    pub adjusted_edge_bps: i64,
    /// Net profit in quote currency after flash fee and gas.
    pub estimated_profit: Decimal,
    pub found_at: DateTime<Utc>,
}

impl ArbitrageOpportunity {
    /// Final asset amount returned by the round trip.
    pub fn amount_out(&self) -> u128 {
        self.second_leg.amount_out
    }
}

impl fmt::Display for ArbitrageOpportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} size={} via {} | raw={}bps adj={}bps | est=${:.2}",
            self.pair,
            self.size,
            self.route,
            self.raw_edge_bps,
            self.adjusted_edge_bps,
            self.estimated_profit,
        )
    }
}

// ---------------------------------------------------------------------------
// Risk mode
// ---------------------------------------------------------------------------

/// Configured appetite; selects the base edge threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskMode {
    Conservative,
    Balanced,
    Aggressive,
    Whale,
}

impl fmt::Display for RiskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskMode::Conservative => write!(f, "conservative"),
            RiskMode::Balanced => write!(f, "balanced"),
            RiskMode::Aggressive => write!(f, "aggressive"),
            RiskMode::Whale => write!(f, "whale"),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Submission channel, from least to most protective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionChannel {
    Public,
    Protected,
    Bundle,
}

impl fmt::Display for SubmissionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionChannel::Public => write!(f, "public"),
            SubmissionChannel::Protected => write!(f, "protected"),
            SubmissionChannel::Bundle => write!(f, "bundle"),
        }
    }
}

/// Terminal record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub opportunity: ArbitrageOpportunity,
    pub identity: String,
    pub sequence: u64,
    pub channel: Option<SubmissionChannel>,
    pub success: bool,
    pub tx_ref: Option<String>,
    /// Realized loss if the settlement layer reported one, else the estimate.
    pub loss: Decimal,
    pub error: Option<String>,
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "OK" } else { "FAILED" };
        write!(
            f,
            "{status} {} from {} seq={} tx={}",
            self.opportunity,
            self.identity,
            self.sequence,
            self.tx_ref.as_deref().unwrap_or("-"),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A single venue could not answer a quote (non-fatal).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{venue} unavailable: {reason}")]
pub struct Unavailable {
    pub venue: VenueKind,
    pub reason: String,
}

/// Why the circuit breaker vetoed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerRejection {
    EmergencyStop,
    DailyLossExceeded,
    Cooldown,
    MarketUnsafe,
}

impl fmt::Display for BreakerRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerRejection::EmergencyStop => write!(f, "emergency stop"),
            BreakerRejection::DailyLossExceeded => write!(f, "daily loss exceeded"),
            BreakerRejection::Cooldown => write!(f, "cooldown"),
            BreakerRejection::MarketUnsafe => write!(f, "market unsafe"),
        }
    }
}

/// Domain-specific error types for the keeper.
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    #[error("No quote for size {size}: {reason}")]
    Unavailable { size: CandidateSize, reason: String },

    #[error("Slippage exceeded for size {size}: {slippage_bps}bps > {max_bps}bps")]
    SlippageExceeded {
        size: CandidateSize,
        slippage_bps: i64,
        max_bps: i64,
    },

    #[error("Not profitable for size {size}: edge {edge_bps}bps <= threshold {threshold_bps}bps")]
    NotProfitable {
        size: CandidateSize,
        edge_bps: i64,
        threshold_bps: i64,
    },

    #[error("Not profitable for size {size}: estimated net {estimated_profit} after flash fee and gas")]
    NetLoss {
        size: CandidateSize,
        estimated_profit: Decimal,
    },

    #[error("Circuit breaker rejected execution: {0}")]
    BreakerRejected(BreakerRejection),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_venue_display_and_parse() {
        for venue in VenueKind::ALL {
            let parsed: VenueKind = venue.to_string().parse().unwrap();
            assert_eq!(parsed, *venue);
        }
        assert_eq!("UNIV3".parse::<VenueKind>().unwrap(), VenueKind::UniswapV3);
        assert_eq!("sushi".parse::<VenueKind>().unwrap(), VenueKind::SushiSwap);
        assert!("binance".parse::<VenueKind>().is_err());
    }

    #[test]
    fn test_venue_serde_matches_display() {
        for venue in VenueKind::ALL {
            let json = serde_json::to_string(venue).unwrap();
            assert_eq!(json, format!("\"{venue}\""));
        }
    }

    #[test]
    fn test_pair_legs_are_mirrored() {
        let pair = Pair {
            asset: "0xusdc".into(),
            intermediate: "0xweth".into(),
            symbol: "USDC/WETH".into(),
            decimals: 6,
        };
        let fwd = pair.leg(Direction::Forward);
        let rev = pair.leg(Direction::Reverse);
        assert_eq!(fwd.token_in, rev.token_out);
        assert_eq!(fwd.token_out, rev.token_in);
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("5000", 6).unwrap(), 5_000_000_000);
        assert_eq!(parse_units(" 0.5 ", 6).unwrap(), 500_000);
        assert_eq!(parse_units("1", 18).unwrap(), 1_000_000_000_000_000_000);
    }

    #[test]
    fn test_parse_units_rejects_bad_input() {
        assert!(parse_units("0", 6).is_err());
        assert!(parse_units("-5", 6).is_err());
        assert!(parse_units("abc", 6).is_err());
        assert!(parse_units("0.0000001", 6).is_err());
        assert!(parse_units("1", 30).is_err());
    }

    #[test]
    fn test_units_to_decimal() {
        assert_eq!(units_to_decimal(100_000_000, 6), dec!(100));
        assert_eq!(units_to_decimal(-1_500_000, 6), dec!(-1.5));
    }

    #[test]
    fn test_channel_ordering_is_by_protection() {
        assert!(SubmissionChannel::Public < SubmissionChannel::Protected);
        assert!(SubmissionChannel::Protected < SubmissionChannel::Bundle);
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = KeeperError::NotProfitable {
            size: CandidateSize(10_000),
            edge_bps: -10,
            threshold_bps: 75,
        };
        let msg = err.to_string();
        assert!(msg.contains("10000"));
        assert!(msg.contains("-10bps"));
        assert!(msg.contains("75bps"));
    }

    #[test]
    fn test_risk_mode_deserializes_lowercase() {
        let mode: RiskMode = serde_json::from_str("\"whale\"").unwrap();
        assert_eq!(mode, RiskMode::Whale);
    }
}
