//! Submission channel selection.
//!
//! Maps the competition score to the most appropriate channel and builds a
//! fallback chain that steps down toward the public mempool.

use crate::types::SubmissionChannel;

#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    /// Competition at or above which the protected channel is used.
    pub protected_above: f64,
    /// Competition at or above which a bundle is used.
    pub bundle_above: f64,
    pub protected_fee_bump_pct: u32,
    pub bundle_fee_bump_pct: u32,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            protected_above: 0.3,
            bundle_above: 0.7,
            protected_fee_bump_pct: 10,
            bundle_fee_bump_pct: 25,
        }
    }
}

/// One step of a submission chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionPlan {
    pub channel: SubmissionChannel,
    /// Priority-fee increase over the network level, in percent.
    pub fee_bump_pct: u32,
}

pub struct SubmissionStrategySelector {
    config: SubmissionConfig,
}

impl SubmissionStrategySelector {
    pub fn new(config: SubmissionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    /// Preferred channel for the given competition score. An unreadable score
    /// is treated as maximum contention.
    pub fn select_channel(&self, competition: f64) -> SubmissionChannel {
        if competition.is_nan() || competition >= self.config.bundle_above {
            SubmissionChannel::Bundle
        } else if competition >= self.config.protected_above {
            SubmissionChannel::Protected
        } else {
            SubmissionChannel::Public
        }
    }

    fn plan_for(&self, channel: SubmissionChannel) -> SubmissionPlan {
        let fee_bump_pct = match channel {
            SubmissionChannel::Public => 0,
            SubmissionChannel::Protected => self.config.protected_fee_bump_pct,
            SubmissionChannel::Bundle => self.config.bundle_fee_bump_pct,
        };
        SubmissionPlan {
            channel,
            fee_bump_pct,
        }
    }

    /// Preferred channel first, then each less protective channel down to
    /// public.
    pub fn plan(&self, competition: f64) -> Vec<SubmissionPlan> {
        let preferred = self.select_channel(competition);
        [
            SubmissionChannel::Bundle,
            SubmissionChannel::Protected,
            SubmissionChannel::Public,
        ]
        .into_iter()
        .filter(|c| *c <= preferred)
        .map(|c| self.plan_for(c))
        .collect()
    }
}
