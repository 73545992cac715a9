//! Backoff controller.
//!
//! Counts consecutive non-actionable cycles and pauses the loop once the
//! configured limit is reached.

use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Consecutive non-actionable cycles before pausing. Zero disables backoff.
    pub limit: u32,
    pub pause: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            pause: Duration::from_secs(300),
        }
    }
}

pub struct BackoffController {
    config: BackoffConfig,
    consecutive: u32,
}

impl BackoffController {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            consecutive: 0,
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Count a cycle with no successful execution. Returns true when the
    /// limit has been reached and the caller should [`engage`](Self::engage).
    pub fn record_non_actionable(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        self.config.limit > 0 && self.consecutive >= self.config.limit
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Sleep for the configured pause, then reset the counter.
    pub async fn engage(&mut self) {
        info!(
            cycles = self.consecutive,
            pause_secs = self.config.pause.as_secs(),
            "Backoff engaged, pausing loop"
        );
        tokio::time::sleep(self.config.pause).await;
        self.consecutive = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_reached() {
        let mut b = BackoffController::new(BackoffConfig {
            limit: 3,
            pause: Duration::from_secs(60),
        });
        assert!(!b.record_non_actionable());
        assert!(!b.record_non_actionable());
        assert!(b.record_non_actionable());
        assert_eq!(b.consecutive(), 3);
    }

    #[test]
    fn test_success_resets() {
        let mut b = BackoffController::new(BackoffConfig {
            limit: 3,
            pause: Duration::from_secs(60),
        });
        b.record_non_actionable();
        b.record_non_actionable();
        b.record_success();
        assert_eq!(b.consecutive(), 0);
        assert!(!b.record_non_actionable());
    }

    #[test]
    fn test_zero_limit_disables() {
        let mut b = BackoffController::new(BackoffConfig {
            limit: 0,
            pause: Duration::from_secs(60),
        });
        for _ in 0..100 {
            assert!(!b.record_non_actionable());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_engage_sleeps_then_resets() {
        let mut b = BackoffController::new(BackoffConfig {
            limit: 2,
            pause: Duration::from_secs(120),
        });
        b.record_non_actionable();
        assert!(b.record_non_actionable());

        let start = tokio::time::Instant::now();
        b.engage().await;
        assert!(start.elapsed() >= Duration::from_secs(120));
        assert_eq!(b.consecutive(), 0);
    }
}
