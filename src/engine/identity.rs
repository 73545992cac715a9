//! Execution identity pool.
//!
//! Holds the fixed set of signing identities, rotates them round-robin, and
//! fetches a fresh sequence number for every assignment. An identity with an
//! attempt still outstanding is never handed out again until released.

use async_trait::async_trait;
use secrecy::SecretString;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::IdentityConfig;
use crate::types::KeeperError;

/// Address used by the synthetic identity in dry-run mode.
pub const DRY_RUN_IDENTITY: &str = "dry-run";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A signing actor that owns its own sequence space.
pub struct ExecutionIdentity {
    pub address: String,
    /// Relay credential authorising submissions from this address.
    credential: Option<SecretString>,
}

impl ExecutionIdentity {
    pub fn new(address: impl Into<String>, credential: Option<SecretString>) -> Self {
        Self {
            address: address.into(),
            credential,
        }
    }

    pub fn dry_run() -> Self {
        Self::new(DRY_RUN_IDENTITY, None)
    }

    pub fn credential(&self) -> Option<&SecretString> {
        self.credential.as_ref()
    }
}

impl fmt::Debug for ExecutionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionIdentity")
            .field("address", &self.address)
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Source of the identity set used at startup.
pub trait IdentityLoader {
    fn load_identities(&self) -> anyhow::Result<Vec<ExecutionIdentity>>;
}

/// Addresses come from config; each entry names the env var holding its
/// credential.
pub struct ConfigIdentityLoader {
    entries: Vec<IdentityConfig>,
    require_credentials: bool,
}

impl ConfigIdentityLoader {
    pub fn new(entries: Vec<IdentityConfig>, require_credentials: bool) -> Self {
        Self {
            entries,
            require_credentials,
        }
    }
}

impl IdentityLoader for ConfigIdentityLoader {
    fn load_identities(&self) -> anyhow::Result<Vec<ExecutionIdentity>> {
        let mut identities = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let credential = match entry.key_env.as_deref() {
                Some(var) => match std::env::var(var) {
                    Ok(value) if !value.trim().is_empty() => {
                        Some(SecretString::new(value.trim().to_string()))
                    }
                    _ if self.require_credentials => {
                        anyhow::bail!(
                            "credential env var {var} for identity {} is not set",
                            entry.address
                        );
                    }
                    _ => {
                        warn!(address = %entry.address, env = var, "Credential not set, continuing without it");
                        None
                    }
                },
                None if self.require_credentials => {
                    anyhow::bail!("identity {} has no key_env configured", entry.address);
                }
                None => None,
            };
            identities.push(ExecutionIdentity::new(entry.address.clone(), credential));
        }
        info!(count = identities.len(), "Execution identities loaded");
        Ok(identities)
    }
}

// ---------------------------------------------------------------------------
// Sequence numbers
// ---------------------------------------------------------------------------

/// Settlement-layer view of an address's next sequence number.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SequenceSource: Send + Sync {
    async fn current_sequence(&self, address: &str) -> anyhow::Result<u64>;
}

/// Process-local counter used when nothing is actually submitted.
#[derive(Debug, Default)]
pub struct LocalSequence {
    next: AtomicU64,
}

#[async_trait]
impl SequenceSource for LocalSequence {
    async fn current_sequence(&self, _address: &str) -> anyhow::Result<u64> {
        Ok(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// An identity checked out for one execution attempt.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub identity: Arc<ExecutionIdentity>,
    pub sequence: u64,
    slot: usize,
}

#[derive(Debug)]
pub struct ExecutionIdentityPool {
    identities: Vec<Arc<ExecutionIdentity>>,
    in_flight: Vec<bool>,
    cursor: usize,
}

impl ExecutionIdentityPool {
    /// An empty set is fatal unless `dry_run`, which substitutes a single
    /// synthetic identity.
    pub fn new(identities: Vec<ExecutionIdentity>, dry_run: bool) -> Result<Self, KeeperError> {
        let identities = if identities.is_empty() {
            if !dry_run {
                return Err(KeeperError::Configuration(
                    "no execution identities configured".to_string(),
                ));
            }
            info!("No identities configured, using synthetic dry-run identity");
            vec![ExecutionIdentity::dry_run()]
        } else {
            identities
        };

        let count = identities.len();
        Ok(Self {
            identities: identities.into_iter().map(Arc::new).collect(),
            in_flight: vec![false; count],
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.iter().filter(|b| **b).count()
    }

    /// Next free identity in rotation, with its current sequence number.
    pub async fn select(&mut self, sequences: &dyn SequenceSource) -> Result<Assignment, KeeperError> {
        let count = self.identities.len();
        for offset in 0..count {
            let slot = (self.cursor + offset) % count;
            if self.in_flight[slot] {
                debug!(address = %self.identities[slot].address, "Identity busy, skipping");
                continue;
            }
            self.cursor = (slot + 1) % count;

            let identity = Arc::clone(&self.identities[slot]);
            let sequence = sequences
                .current_sequence(&identity.address)
                .await
                .map_err(|e| {
                    KeeperError::ExecutionFailed(format!(
                        "sequence fetch for {} failed: {e}",
                        identity.address
                    ))
                })?;

            self.in_flight[slot] = true;
            debug!(address = %identity.address, sequence, "Identity assigned");
            return Ok(Assignment {
                identity,
                sequence,
                slot,
            });
        }

        Err(KeeperError::ExecutionFailed(
            "every identity has an attempt in flight".to_string(),
        ))
    }

    /// Return an identity once its attempt has reached a terminal state.
    pub fn release(&mut self, assignment: &Assignment) {
        if let Some(flag) = self.in_flight.get_mut(assignment.slot) {
            *flag = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
