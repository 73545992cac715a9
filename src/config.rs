//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets and endpoints are referenced by env-var name in the config and
//! resolved at startup via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::engine::submission::SubmissionConfig;
use crate::market::MarketConfig;
use crate::storage::DEFAULT_STATE_FILE;
use crate::strategy::backoff::BackoffConfig;
use crate::strategy::breaker::BreakerConfig;
use crate::strategy::edge::EdgeConfig;
use crate::strategy::threshold::{ModeThresholds, ThresholdConfig};
use crate::types::{
    parse_units, CandidateSize, KeeperError, Pair, RiskMode, Route, VenueKind, MAX_DECIMALS,
};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub keeper: KeeperConfig,
    pub pair: PairConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub threshold: ThresholdSection,
    #[serde(default)]
    pub market: MarketSection,
    #[serde(default)]
    pub backoff: BackoffSection,
    #[serde(default)]
    pub submission: SubmissionSection,
    #[serde(default)]
    pub venues: Vec<VenueConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KeeperConfig {
    pub name: String,
    pub poll_interval_secs: u64,
    pub dry_run: bool,
    /// Upper bound on one submission, all channel fallbacks included.
    pub execution_deadline_secs: u64,
    pub breaker_state_path: String,
    /// JSON-lines event log; disabled when absent.
    pub events_path: Option<String>,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            name: "FLASHLOOP-001".to_string(),
            poll_interval_secs: 12,
            dry_run: true,
            execution_deadline_secs: 60,
            breaker_state_path: DEFAULT_STATE_FILE.to_string(),
            events_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PairConfig {
    pub asset: String,
    pub intermediate: String,
    pub symbol: String,
    pub decimals: u32,
    #[serde(default = "default_asset_price")]
    pub asset_price_usd: Decimal,
    /// Human amounts of the asset, evaluated in this order.
    #[serde(default = "default_candidate_sizes")]
    pub candidate_sizes: Vec<String>,
}

fn default_asset_price() -> Decimal {
    Decimal::ONE
}

fn default_candidate_sizes() -> Vec<String> {
    ["5000", "10000", "20000", "40000", "80000"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    pub mode: RiskMode,
    pub mode_thresholds: ModeThresholds,
    pub max_slippage_bps: i64,
    pub slippage_buffer_bps: i64,
    pub flash_loan_fee_bps: i64,
    pub gas_cost_usd: Decimal,
    pub max_daily_loss_usd: Decimal,
    pub max_consecutive_failures: u32,
    pub cooldown_secs: u64,
    pub catastrophic_loss_usd: Option<Decimal>,
    pub max_fee_level_gwei: f64,
    pub max_volatility: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            mode: RiskMode::Balanced,
            mode_thresholds: ModeThresholds::default(),
            max_slippage_bps: 500,
            slippage_buffer_bps: 0,
            flash_loan_fee_bps: 9,
            gas_cost_usd: dec!(20),
            max_daily_loss_usd: dec!(100),
            max_consecutive_failures: 3,
            cooldown_secs: 300,
            catastrophic_loss_usd: Some(dec!(50)),
            max_fee_level_gwei: 200.0,
            max_volatility: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ThresholdSection {
    pub fee_reference_gwei: f64,
    pub fee_factor_cap: f64,
    pub volatility_weight: f64,
    pub volatility_factor_cap: f64,
    pub competition_weight: f64,
    pub competition_factor_cap: f64,
}

impl Default for ThresholdSection {
    fn default() -> Self {
        let d = ThresholdConfig::default();
        Self {
            fee_reference_gwei: d.fee_reference_gwei,
            fee_factor_cap: d.fee_factor_cap,
            volatility_weight: d.volatility_weight,
            volatility_factor_cap: d.volatility_factor_cap,
            competition_weight: d.competition_weight,
            competition_factor_cap: d.competition_factor_cap,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketSection {
    pub history_capacity: usize,
    pub volatility_window: usize,
    pub contention_saturation: u64,
    pub min_sample_interval_secs: u64,
    /// Env var holding the JSON-RPC endpoint.
    pub rpc_url_env: String,
    pub rpc_timeout_secs: u64,
}

impl Default for MarketSection {
    fn default() -> Self {
        Self {
            history_capacity: 288,
            volatility_window: 12,
            contention_saturation: 300,
            min_sample_interval_secs: 5,
            rpc_url_env: "FLASHLOOP_RPC_URL".to_string(),
            rpc_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackoffSection {
    pub limit: u32,
    pub pause_secs: u64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            limit: 10,
            pause_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SubmissionSection {
    pub protected_above: f64,
    pub bundle_above: f64,
    pub protected_fee_bump_pct: u32,
    pub bundle_fee_bump_pct: u32,
    /// Env var holding the settlement relay URL (live mode only).
    pub relay_url_env: String,
    pub relay_timeout_secs: u64,
}

impl Default for SubmissionSection {
    fn default() -> Self {
        Self {
            protected_above: 0.3,
            bundle_above: 0.7,
            protected_fee_bump_pct: 10,
            bundle_fee_bump_pct: 25,
            relay_url_env: "FLASHLOOP_RELAY_URL".to_string(),
            relay_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenueConfig {
    pub kind: VenueKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower is tried first.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Env var holding the venue's quote endpoint.
    pub endpoint_env: String,
    pub fee_tiers: Vec<u32>,
    #[serde(default = "default_venue_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    100
}

fn default_venue_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RouteConfig {
    pub first: VenueKind,
    pub second: VenueKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    pub address: String,
    /// Env var holding this identity's relay credential.
    #[serde(default)]
    pub key_env: Option<String>,
}

fn invalid(msg: impl Into<String>) -> KeeperError {
    KeeperError::Configuration(msg.into())
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Reject every setting the keeper cannot run with.
    pub fn validate(&self) -> Result<(), KeeperError> {
        let k = &self.keeper;
        if k.poll_interval_secs == 0 {
            return Err(invalid("keeper.poll_interval_secs must be at least 1"));
        }
        if k.execution_deadline_secs == 0 {
            return Err(invalid("keeper.execution_deadline_secs must be at least 1"));
        }

        let p = &self.pair;
        if p.asset.trim().is_empty() || p.intermediate.trim().is_empty() {
            return Err(invalid("pair.asset and pair.intermediate are required"));
        }
        if p.asset.eq_ignore_ascii_case(&p.intermediate) {
            return Err(invalid("pair.asset and pair.intermediate must differ"));
        }
        if p.decimals > MAX_DECIMALS {
            return Err(invalid(format!(
                "pair.decimals {} exceeds {MAX_DECIMALS}",
                p.decimals
            )));
        }
        if p.asset_price_usd <= Decimal::ZERO {
            return Err(invalid("pair.asset_price_usd must be positive"));
        }
        self.candidate_sizes()?;

        let r = &self.risk;
        r.mode_thresholds.validate()?;
        if r.max_slippage_bps <= 0 {
            return Err(invalid("risk.max_slippage_bps must be positive"));
        }
        if r.slippage_buffer_bps < 0 || r.flash_loan_fee_bps < 0 {
            return Err(invalid("risk fee and buffer bps must not be negative"));
        }
        if r.gas_cost_usd < Decimal::ZERO {
            return Err(invalid("risk.gas_cost_usd must not be negative"));
        }
        if r.max_daily_loss_usd <= Decimal::ZERO {
            return Err(invalid("risk.max_daily_loss_usd must be positive"));
        }
        if r.max_consecutive_failures == 0 {
            return Err(invalid("risk.max_consecutive_failures must be at least 1"));
        }
        if matches!(r.catastrophic_loss_usd, Some(limit) if limit <= Decimal::ZERO) {
            return Err(invalid("risk.catastrophic_loss_usd must be positive when set"));
        }
        if !(r.max_fee_level_gwei > 0.0) || !(r.max_volatility > 0.0) {
            return Err(invalid("risk market ceilings must be positive"));
        }

        let t = &self.threshold;
        if !(t.fee_reference_gwei > 0.0) {
            return Err(invalid("threshold.fee_reference_gwei must be positive"));
        }
        for (name, cap) in [
            ("fee_factor_cap", t.fee_factor_cap),
            ("volatility_factor_cap", t.volatility_factor_cap),
            ("competition_factor_cap", t.competition_factor_cap),
        ] {
            if !(cap >= 1.0) {
                return Err(invalid(format!("threshold.{name} must be at least 1")));
            }
        }
        if !(t.volatility_weight >= 0.0) || !(t.competition_weight >= 0.0) {
            return Err(invalid("threshold weights must not be negative"));
        }

        let m = &self.market;
        if m.history_capacity == 0 {
            return Err(invalid("market.history_capacity must be at least 1"));
        }
        if m.volatility_window == 0 || m.volatility_window > m.history_capacity {
            return Err(invalid(
                "market.volatility_window must be between 1 and history_capacity",
            ));
        }
        if m.contention_saturation == 0 {
            return Err(invalid("market.contention_saturation must be at least 1"));
        }

        let s = &self.submission;
        if !(0.0..=1.0).contains(&s.protected_above)
            || !(0.0..=1.0).contains(&s.bundle_above)
            || s.protected_above > s.bundle_above
        {
            return Err(invalid(
                "submission cut-offs must satisfy 0 <= protected_above <= bundle_above <= 1",
            ));
        }

        let mut seen = HashSet::new();
        for venue in &self.venues {
            if !seen.insert(venue.kind) {
                return Err(invalid(format!("venue {} configured twice", venue.kind)));
            }
            if venue.enabled && venue.fee_tiers.is_empty() {
                return Err(invalid(format!("venue {} has no fee tiers", venue.kind)));
            }
            if venue.enabled && venue.timeout_ms == 0 {
                return Err(invalid(format!("venue {} timeout must be positive", venue.kind)));
            }
        }
        let enabled = self.enabled_venues();
        if enabled.is_empty() {
            return Err(invalid("at least one venue must be enabled"));
        }

        if self.routes.is_empty() {
            return Err(invalid("at least one route is required"));
        }
        for route in &self.routes {
            for venue in [route.first, route.second] {
                if !enabled.iter().any(|v| v.kind == venue) {
                    return Err(invalid(format!(
                        "route {}->{} uses venue {venue} which is not enabled",
                        route.first, route.second
                    )));
                }
            }
        }

        if !k.dry_run && self.identities.is_empty() {
            return Err(invalid("live mode requires at least one [[identities]] entry"));
        }
        let mut addresses = HashSet::new();
        for identity in &self.identities {
            if identity.address.trim().is_empty() {
                return Err(invalid("identity address must not be empty"));
            }
            if !addresses.insert(identity.address.to_lowercase()) {
                return Err(invalid(format!("identity {} listed twice", identity.address)));
            }
        }

        Ok(())
    }

    // -- Builders ---------------------------------------------------------

    pub fn pair(&self) -> Pair {
        Pair {
            asset: self.pair.asset.clone(),
            intermediate: self.pair.intermediate.clone(),
            symbol: self.pair.symbol.clone(),
            decimals: self.pair.decimals,
        }
    }

    /// Candidate sizes in base units, in configured order.
    pub fn candidate_sizes(&self) -> Result<Vec<CandidateSize>, KeeperError> {
        if self.pair.candidate_sizes.is_empty() {
            return Err(invalid("pair.candidate_sizes must not be empty"));
        }
        self.pair
            .candidate_sizes
            .iter()
            .map(|s| parse_units(s, self.pair.decimals).map(CandidateSize))
            .collect()
    }

    /// Enabled venues, highest priority first.
    pub fn enabled_venues(&self) -> Vec<&VenueConfig> {
        let mut venues: Vec<&VenueConfig> = self.venues.iter().filter(|v| v.enabled).collect();
        venues.sort_by_key(|v| v.priority);
        venues
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes
            .iter()
            .map(|r| Route {
                first: r.first,
                second: r.second,
            })
            .collect()
    }

    pub fn edge_config(&self) -> EdgeConfig {
        EdgeConfig {
            max_slippage_bps: self.risk.max_slippage_bps,
            slippage_buffer_bps: self.risk.slippage_buffer_bps,
            flash_loan_fee_bps: self.risk.flash_loan_fee_bps,
            gas_cost: self.risk.gas_cost_usd,
            asset_price: self.pair.asset_price_usd,
        }
    }

    pub fn threshold_config(&self) -> ThresholdConfig {
        let t = &self.threshold;
        ThresholdConfig {
            mode: self.risk.mode,
            modes: self.risk.mode_thresholds.clone(),
            fee_reference_gwei: t.fee_reference_gwei,
            fee_factor_cap: t.fee_factor_cap,
            volatility_weight: t.volatility_weight,
            volatility_factor_cap: t.volatility_factor_cap,
            competition_weight: t.competition_weight,
            competition_factor_cap: t.competition_factor_cap,
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        let r = &self.risk;
        BreakerConfig {
            max_daily_loss: r.max_daily_loss_usd,
            max_consecutive_failures: r.max_consecutive_failures,
            cooldown: chrono::Duration::seconds(r.cooldown_secs.min(i64::MAX as u64) as i64),
            max_fee_level_gwei: r.max_fee_level_gwei,
            max_volatility: r.max_volatility,
            catastrophic_loss: r.catastrophic_loss_usd,
        }
    }

    pub fn market_config(&self) -> MarketConfig {
        let m = &self.market;
        MarketConfig {
            history_capacity: m.history_capacity,
            volatility_window: m.volatility_window,
            contention_saturation: m.contention_saturation,
            min_sample_interval: Duration::from_secs(m.min_sample_interval_secs),
        }
    }

    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            limit: self.backoff.limit,
            pause: Duration::from_secs(self.backoff.pause_secs),
        }
    }

    pub fn submission_config(&self) -> SubmissionConfig {
        let s = &self.submission;
        SubmissionConfig {
            protected_above: s.protected_above,
            bundle_above: s.bundle_above,
            protected_fee_bump_pct: s.protected_fee_bump_pct,
            bundle_fee_bump_pct: s.bundle_fee_bump_pct,
        }
    }
}
