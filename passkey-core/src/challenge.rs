//! In-memory store for ceremony challenges
//!
//! Each binding key (an identity handle, or a synthetic anonymous key for
//! discoverable-credential flows) holds at most one live challenge. Issuing a new
//! challenge replaces the previous one; consuming removes it atomically, so a
//! challenge can be redeemed exactly once.
//!
//! The store is process-local and does not survive a restart. Expired entries are
//! rejected lazily on consume and evicted by [`ChallengeStore::sweep_expired`],
//! which the server runs on an interval.

use dashmap::DashMap;
use rand::{rngs::OsRng, RngCore};
use std::time::{Duration, Instant};

use crate::error::{CeremonyError, Result};
use crate::model::{base64url_decode, base64url_encode};

/// Challenge length in bytes
pub const CHALLENGE_LEN: usize = 32;

/// Default lifetime of an issued challenge (5 minutes)
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);

/// Default upper bound on live entries
pub const DEFAULT_CHALLENGE_CAPACITY: usize = 100_000;

const ANONYMOUS_PREFIX: &str = "anonymous:";

/// A server-issued random challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct Challenge([u8; CHALLENGE_LEN]);

impl Challenge {
    fn random() -> Self {
        let mut bytes = [0u8; CHALLENGE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; CHALLENGE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        base64url_encode(&self.0)
    }
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Challenge(<redacted>)")
    }
}

/// Binding key for a discoverable-credential challenge.
///
/// The key is derived from the challenge itself, so the finish step can find it
/// again from the challenge echoed in the client data.
pub fn anonymous_binding_key(challenge_bytes: &[u8]) -> String {
    format!("{ANONYMOUS_PREFIX}{}", base64url_encode(challenge_bytes))
}

/// Whether a binding key was produced by [`anonymous_binding_key`].
pub fn is_anonymous_binding_key(key: &str) -> bool {
    key.strip_prefix(ANONYMOUS_PREFIX)
        .and_then(base64url_decode)
        .is_some_and(|bytes| bytes.len() == CHALLENGE_LEN)
}

/// Challenge store limits
#[derive(Debug, Clone)]
pub struct ChallengeStoreConfig {
    /// How long an issued challenge stays redeemable
    pub ttl: Duration,
    /// Maximum number of entries held at once
    pub capacity: usize,
}

impl Default for ChallengeStoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CHALLENGE_TTL,
            capacity: DEFAULT_CHALLENGE_CAPACITY,
        }
    }
}

struct ChallengeEntry {
    challenge: Challenge,
    expires_at: Instant,
}

/// Thread-safe, bounded, expiring challenge store
#[derive(Default)]
pub struct ChallengeStore {
    /// binding key -> live challenge
    entries: DashMap<String, ChallengeEntry>,
    config: ChallengeStoreConfig,
}

impl ChallengeStore {
    pub fn new(config: ChallengeStoreConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Issue a fresh challenge for `binding_key`, replacing any unconsumed one.
    ///
    /// Fails with [`CeremonyError::CapacityExceeded`] when the store is full of
    /// live entries for other keys.
    pub fn issue(&self, binding_key: &str) -> Result<Challenge> {
        let challenge = Challenge::random();
        self.insert(binding_key.to_string(), challenge.clone())?;
        Ok(challenge)
    }

    /// Issue a challenge for a discoverable-credential flow.
    ///
    /// Returns the synthetic binding key together with the challenge.
    pub fn issue_anonymous(&self) -> Result<(String, Challenge)> {
        let challenge = Challenge::random();
        let key = anonymous_binding_key(challenge.as_bytes());
        self.insert(key.clone(), challenge.clone())?;
        Ok((key, challenge))
    }

    fn insert(&self, binding_key: String, challenge: Challenge) -> Result<()> {
        let expires_at = Instant::now().checked_add(self.config.ttl).ok_or_else(|| {
            CeremonyError::InvalidInput(format!(
                "challenge ttl of {}s is out of range",
                self.config.ttl.as_secs()
            ))
        })?;

        if self.entries.len() >= self.config.capacity && !self.entries.contains_key(&binding_key) {
            self.sweep_expired();
            if self.entries.len() >= self.config.capacity {
                tracing::warn!(
                    capacity = self.config.capacity,
                    "Challenge store full, refusing to issue"
                );
                return Err(CeremonyError::CapacityExceeded);
            }
        }

        self.entries.insert(
            binding_key,
            ChallengeEntry {
                challenge,
                expires_at,
            },
        );
        Ok(())
    }

    /// Remove and return the challenge bound to `binding_key`.
    ///
    /// The entry is removed even when it turns out to be expired.
    pub fn consume_and_invalidate(&self, binding_key: &str) -> Result<Challenge> {
        let (_, entry) = self
            .entries
            .remove(binding_key)
            .ok_or_else(|| CeremonyError::not_found("challenge"))?;

        if entry.expires_at > Instant::now() {
            Ok(entry.challenge)
        } else {
            Err(CeremonyError::Expired)
        }
    }

    /// Evict expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Swept expired challenges");
        }
        removed
    }

    /// Number of entries currently held (expired ones included until swept)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish()
    }
}
