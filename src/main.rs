//! FLASHLOOP: flash-loan round-trip arbitrage keeper
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores breaker state from disk, wires venues, signals, identities and
//! settlement, then runs the polling loop with graceful shutdown.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use flashloop::config::AppConfig;
use flashloop::engine::events::{spawn_jsonl_writer, ChannelSink, EventSink, FanoutSink, TracingSink};
use flashloop::engine::identity::{
    ConfigIdentityLoader, ExecutionIdentityPool, IdentityLoader, LocalSequence, SequenceSource,
};
use flashloop::engine::settlement::{DryRunSettlement, HttpSettlement, Settlement, Submitter, SubmitterConfig};
use flashloop::engine::submission::SubmissionStrategySelector;
use flashloop::engine::{Keeper, KeeperComponents};
use flashloop::market::{MarketConditionMonitor, MarketSignals};
use flashloop::rpc::ChainRpc;
use flashloop::storage;
use flashloop::strategy::backoff::BackoffController;
use flashloop::strategy::breaker::CircuitBreaker;
use flashloop::strategy::edge::EdgeCalculator;
use flashloop::strategy::threshold::AdaptiveThreshold;
use flashloop::strategy::OpportunityGate;
use flashloop::types::FeeTier;
use flashloop::venues::http::HttpQuoteSource;
use flashloop::venues::QuoteRouter;

const BANNER: &str = r#"
 _____ _     ___  ____  _   _ _     ___   ___  ____
|  ___| |   / _ \/ ___|| | | | |   / _ \ / _ \|  _ \
| |_  | |  | |_| \___ \| |_| | |  | | | | | | | |_) |
|  _| | |__|  _  |___) |  _  | |__| |_| | |_| |  __/
|_|   |_____|_| |_|____/|_| |_|_____\___/ \___/|_|

  Flash-loan round-trip arbitrage keeper
  v0.1.0
"#;

#[derive(Parser, Debug)]
#[command(version, about = "Flash-loan round-trip arbitrage keeper")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Clear a persisted emergency halt before starting (operator reset)
    #[arg(long)]
    clear_halt: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let args = Args::parse();

    // Load and validate configuration from TOML
    let cfg = AppConfig::load(&args.config)?;
    cfg.validate()?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        keeper = %cfg.keeper.name,
        pair = %cfg.pair.symbol,
        mode = %cfg.risk.mode,
        dry_run = cfg.keeper.dry_run,
        poll_interval_secs = cfg.keeper.poll_interval_secs,
        "FLASHLOOP starting up"
    );

    // -- Restore breaker state -------------------------------------------

    let state_path = cfg.keeper.breaker_state_path.clone();
    let mut breaker = match storage::load_breaker_state(Some(&state_path))? {
        Some(state) => CircuitBreaker::with_state(cfg.breaker_config(), state),
        None => CircuitBreaker::new(cfg.breaker_config(), Utc::now()),
    };
    if args.clear_halt {
        let operator = std::env::var("USER").unwrap_or_else(|_| "operator".to_string());
        breaker.clear_emergency_halt(&operator);
        storage::save_breaker_state(breaker.state(), Some(&state_path))?;
    }

    // -- Venues ------------------------------------------------------------

    let mut router = QuoteRouter::new(cfg.pair());
    for venue in cfg.enabled_venues() {
        let endpoint = AppConfig::resolve_env(&venue.endpoint_env)
            .with_context(|| format!("Quote endpoint for {}", venue.kind))?;
        let timeout = Duration::from_millis(venue.timeout_ms);
        let tiers = venue.fee_tiers.iter().copied().map(FeeTier).collect();
        let source = HttpQuoteSource::new(venue.kind, endpoint, tiers, timeout)?;
        router.register(Arc::new(source), timeout);
        info!(venue = %venue.kind, priority = venue.priority, "Venue registered");
    }
    let calculator = EdgeCalculator::new(router, cfg.routes(), cfg.edge_config());

    // -- Network signals & sequences ---------------------------------------

    let rpc_url = AppConfig::resolve_env(&cfg.market.rpc_url_env)?;
    let rpc = Arc::new(ChainRpc::new(
        &rpc_url,
        Duration::from_secs(cfg.market.rpc_timeout_secs),
    )?);
    let signals: Arc<dyn MarketSignals> = rpc.clone();

    // -- Identities & settlement -------------------------------------------

    let loader = ConfigIdentityLoader::new(cfg.identities.clone(), !cfg.keeper.dry_run);
    let identities = loader.load_identities()?;
    let pool = ExecutionIdentityPool::new(identities, cfg.keeper.dry_run)?;

    let sequences: Arc<dyn SequenceSource>;
    let settlement: Arc<dyn Settlement>;
    if cfg.keeper.dry_run {
        warn!("Dry-run mode: nothing will be submitted");
        sequences = Arc::new(LocalSequence::default());
        settlement = Arc::new(DryRunSettlement);
    } else {
        let relay_url = AppConfig::resolve_env(&cfg.submission.relay_url_env)?;
        sequences = rpc.clone();
        settlement = Arc::new(HttpSettlement::new(
            relay_url,
            Duration::from_secs(cfg.submission.relay_timeout_secs),
        )?);
    }

    let submitter = Submitter::new(
        settlement,
        SubmitterConfig {
            deadline: Duration::from_secs(cfg.keeper.execution_deadline_secs),
            failure_loss_estimate: cfg.risk.gas_cost_usd,
        },
    );

    // -- Events --------------------------------------------------------------

    let mut fanout = FanoutSink::new(vec![Arc::new(TracingSink)]);
    let mut writer = None;
    if let Some(path) = cfg.keeper.events_path.clone() {
        let (sink, rx) = ChannelSink::new();
        fanout.push(Arc::new(sink));
        writer = Some(spawn_jsonl_writer(rx, path));
    }
    let events: Arc<dyn EventSink> = Arc::new(fanout);

    // -- Main loop -----------------------------------------------------------

    let sizes = cfg.candidate_sizes()?;
    let mut keeper = Keeper::new(KeeperComponents {
        sizes,
        poll_interval: Duration::from_secs(cfg.keeper.poll_interval_secs),
        calculator,
        monitor: MarketConditionMonitor::new(cfg.market_config()),
        signals,
        gate: OpportunityGate::new(AdaptiveThreshold::new(cfg.threshold_config()), breaker),
        backoff: BackoffController::new(cfg.backoff_config()),
        pool,
        sequences,
        selector: SubmissionStrategySelector::new(cfg.submission_config()),
        submitter,
        events,
        state_path: Some(state_path),
    });

    keeper
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    let state = keeper.breaker_state();
    info!(
        cycles = keeper.cycles(),
        failures = state.consecutive_failures,
        daily_loss = format!("${:.2}", state.daily_loss),
        halted = state.emergency_halt,
        "FLASHLOOP shut down cleanly."
    );

    // Closing every sender lets the event writer drain and exit
    drop(keeper);
    if let Some(handle) = writer {
        handle.await.context("Event writer task panicked")??;
    }

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flashloop=info"));

    let json_logging = std::env::var("FLASHLOOP_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
