//! Replay defence.
//!
//! Every packet carries a 64-bit freshness token. Two policies interpret it:
//!
//! - **Timestamp**: the sender stamps Unix seconds; the receiver accepts the
//!   packet iff `|now - stamp| <= max_skew_secs` and the packet's tag has not
//!   already been accepted inside that window.
//! - **Nonce**: the sender draws a random u64; the receiver rejects any value
//!   already held in its bounded cache.
//!
//! Replay state lives in a [`FreshnessContext`] owned by one connection and
//! passed by reference into decode calls. Clones share the same state, so the
//! send and receive halves of a channel (or concurrent decoders) observe one
//! serialized view.

use crate::error::{constants, ProtocolError, Result};
use crate::utils::replay_cache::ReplayCache;
use crate::utils::time;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Default tolerated clock difference for the timestamp policy
pub const DEFAULT_MAX_SKEW_SECS: u64 = 5;

/// Default number of tokens remembered by either policy
pub const DEFAULT_CACHE_CAPACITY: usize = 4_096;

fn default_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

/// Configuration-selected replay policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FreshnessPolicy {
    Timestamp {
        max_skew_secs: u64,
        #[serde(default = "default_capacity")]
        window_capacity: usize,
    },
    Nonce {
        #[serde(default = "default_capacity")]
        capacity: usize,
    },
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        FreshnessPolicy::Timestamp {
            max_skew_secs: DEFAULT_MAX_SKEW_SECS,
            window_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl FreshnessPolicy {
    pub fn timestamp(max_skew_secs: u64) -> Self {
        FreshnessPolicy::Timestamp {
            max_skew_secs,
            window_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub fn nonce(capacity: usize) -> Self {
        FreshnessPolicy::Nonce { capacity }
    }

    /// Produce the token a sender embeds in its next packet.
    pub fn issue(&self) -> Result<u64> {
        match self {
            FreshnessPolicy::Timestamp { .. } => time::unix_seconds(),
            FreshnessPolicy::Nonce { .. } => Ok(rand::rng().random::<u64>()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FreshnessPolicy::Timestamp { .. } => "timestamp",
            FreshnessPolicy::Nonce { .. } => "nonce",
        }
    }
}

/// Mutable replay state for one connection
#[derive(Debug)]
pub struct FreshnessGuard {
    policy: FreshnessPolicy,
    nonces: ReplayCache<u64>,
    tags: ReplayCache<Vec<u8>>,
}

impl FreshnessGuard {
    pub fn new(policy: FreshnessPolicy) -> Self {
        let (nonce_cap, tag_cap) = match &policy {
            FreshnessPolicy::Nonce { capacity } => (*capacity, 1),
            FreshnessPolicy::Timestamp {
                window_capacity, ..
            } => (1, *window_capacity),
        };
        Self {
            policy,
            nonces: ReplayCache::with_capacity(nonce_cap),
            tags: ReplayCache::with_capacity(tag_cap),
        }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Validate the token of an authenticated packet.
    ///
    /// `tag` is the packet's authentication tag; under the timestamp policy it
    /// identifies the packet inside the skew window.
    pub fn check(&mut self, freshness: u64, tag: &[u8]) -> Result<()> {
        self.check_at(freshness, tag, time::unix_seconds()?)
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&mut self, freshness: u64, tag: &[u8], now: u64) -> Result<()> {
        match &self.policy {
            FreshnessPolicy::Timestamp { max_skew_secs, .. } => {
                let max_skew = *max_skew_secs;
                let skew = time::skew(now, freshness);
                if skew > max_skew {
                    return Err(ProtocolError::Replay(format!(
                        "{}: stamp {freshness}, now {now}, max skew {max_skew}s",
                        constants::ERR_STALE_TIMESTAMP
                    )));
                }
                self.tags.evict_older_than(now.saturating_sub(max_skew));
                if self.tags.is_replay(tag.to_vec(), freshness) {
                    return Err(ProtocolError::Replay(format!(
                        "{}: stamp {freshness}",
                        constants::ERR_TAG_REPLAY
                    )));
                }
            }
            FreshnessPolicy::Nonce { .. } => {
                if self.nonces.is_replay(freshness, now) {
                    return Err(ProtocolError::Replay(format!(
                        "{}: {freshness:#018x}",
                        constants::ERR_NONCE_REPLAY
                    )));
                }
            }
        }
        debug!(freshness, policy = self.policy.name(), "Freshness accepted");
        Ok(())
    }

    /// Tokens currently remembered.
    pub fn remembered(&self) -> usize {
        self.nonces.len() + self.tags.len()
    }
}

/// Shared handle to a connection's [`FreshnessGuard`]
#[derive(Debug, Clone)]
pub struct FreshnessContext {
    inner: Arc<Mutex<FreshnessGuard>>,
}

impl FreshnessContext {
    pub fn new(policy: FreshnessPolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FreshnessGuard::new(policy))),
        }
    }

    /// Token for the next outgoing packet.
    pub fn issue(&self) -> Result<u64> {
        self.lock()?.policy().issue()
    }

    /// Validate an incoming token under the connection lock.
    pub fn check(&self, freshness: u64, tag: &[u8]) -> Result<()> {
        self.lock()?.check(freshness, tag)
    }

    pub fn policy(&self) -> Result<FreshnessPolicy> {
        Ok(self.lock()?.policy().clone())
    }

    pub fn remembered(&self) -> Result<usize> {
        Ok(self.lock()?.remembered())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FreshnessGuard>> {
        self.inner
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_inside_window_accepted_once() {
        let mut guard = FreshnessGuard::new(FreshnessPolicy::timestamp(5));
        guard.check_at(1_000, b"tag-a", 1_003).unwrap();
        assert!(matches!(
            guard.check_at(1_000, b"tag-a", 1_003),
            Err(ProtocolError::Replay(_))
        ));
        guard.check_at(1_000, b"tag-b", 1_004).unwrap();
    }

    #[test]
    fn test_timestamp_outside_window_rejected() {
        let mut guard = FreshnessGuard::new(FreshnessPolicy::timestamp(5));
        assert!(guard.check_at(1_000, b"old", 1_006).is_err());
        assert!(guard.check_at(1_010, b"future", 1_004).is_err());
        guard.check_at(1_000, b"edge", 1_005).unwrap();
    }

    #[test]
    fn test_timestamp_memory_expires_with_window() {
        let mut guard = FreshnessGuard::new(FreshnessPolicy::timestamp(5));
        guard.check_at(1_000, b"a", 1_000).unwrap();
        guard.check_at(1_010, b"b", 1_010).unwrap();
        assert_eq!(guard.remembered(), 1);
    }

    #[test]
    fn test_nonce_policy() {
        let mut guard = FreshnessGuard::new(FreshnessPolicy::nonce(2));
        guard.check_at(11, b"", 0).unwrap();
        assert!(guard.check_at(11, b"", 0).is_err());
        guard.check_at(12, b"", 0).unwrap();
        guard.check_at(13, b"", 0).unwrap();
        assert_eq!(guard.remembered(), 2);
    }

    #[test]
    fn test_issue_matches_policy() {
        let now = time::unix_seconds().unwrap();
        let ts = FreshnessPolicy::timestamp(5).issue().unwrap();
        assert!(time::skew(ts, now) <= 1);

        let a = FreshnessPolicy::nonce(8).issue().unwrap();
        let b = FreshnessPolicy::nonce(8).issue().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_context_clones_share_state() {
        let ctx = FreshnessContext::new(FreshnessPolicy::nonce(16));
        let other = ctx.clone();
        ctx.check(42, b"").unwrap();
        assert!(other.check(42, b"").is_err());
    }

    #[test]
    fn test_policy_toml_shape() {
        let policy: FreshnessPolicy = toml::from_str("mode = \"nonce\"\ncapacity = 64").unwrap();
        assert_eq!(policy, FreshnessPolicy::nonce(64));
        let policy: FreshnessPolicy =
            toml::from_str("mode = \"timestamp\"\nmax_skew_secs = 5").unwrap();
        assert_eq!(policy, FreshnessPolicy::timestamp(5));
    }
}
