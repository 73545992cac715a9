//! Persistence layer.
//!
//! Saves and loads circuit breaker state to/from a JSON file so that the
//! loss window and a sticky emergency halt survive restarts.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::strategy::breaker::CircuitBreakerState;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "flashloop_breaker.json";

/// Save breaker state to a JSON file. Writes to a temporary sibling first so
/// a crash mid-write never leaves a truncated file behind.
pub fn save_breaker_state(state: &CircuitBreakerState, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state)
        .context("Failed to serialise breaker state")?;

    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &json)
        .context(format!("Failed to write state to {tmp}"))?;
    std::fs::rename(&tmp, path)
        .context(format!("Failed to move state into {path}"))?;

    debug!(
        path,
        failures = state.consecutive_failures,
        daily_loss = %state.daily_loss,
        halt = state.emergency_halt,
        "Breaker state saved"
    );
    Ok(())
}

/// Load breaker state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_breaker_state(path: Option<&str>) -> Result<Option<CircuitBreakerState>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved breaker state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read state from {path}"))?;

    let state: CircuitBreakerState = serde_json::from_str(&json)
        .context(format!("Failed to parse state from {path}"))?;

    if state.emergency_halt {
        warn!(
            path,
            reason = state.halt_reason.as_deref().unwrap_or("unknown"),
            "Breaker state loaded with EMERGENCY HALT set"
        );
    } else {
        info!(
            path,
            failures = state.consecutive_failures,
            daily_loss = %state.daily_loss,
            "Breaker state loaded from disk"
        );
    }

    Ok(Some(state))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
