//! In-process revocation store

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::RevocationStore;
use crate::error::{AuthError, AuthResult};
use crate::store::clamp_ttl;

/// Entry count above which inserts trigger a purge of expired entries
const DEFAULT_PURGE_THRESHOLD: usize = 10_000;

/// Revocation store backed by two concurrent maps
///
/// Expired entries are treated as absent on read and removed lazily, plus
/// in bulk whenever a map grows past the purge threshold.
#[derive(Debug)]
pub struct MemoryRevocationStore {
    tokens: DashMap<String, Instant>,
    families: DashMap<String, Instant>,
    purge_threshold: usize,
    closed: AtomicBool,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::with_purge_threshold(DEFAULT_PURGE_THRESHOLD)
    }

    pub fn with_purge_threshold(purge_threshold: usize) -> Self {
        Self {
            tokens: DashMap::new(),
            families: DashMap::new(),
            purge_threshold,
            closed: AtomicBool::new(false),
        }
    }

    /// Drop all expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.tokens.len() + self.families.len();
        self.tokens.retain(|_, expires| *expires > now);
        self.families.retain(|_, expires| *expires > now);
        let removed = before.saturating_sub(self.tokens.len() + self.families.len());
        if removed > 0 {
            debug!(removed, "Purged expired revocation entries");
        }
        removed
    }

    /// Number of stored entries (tokens and families), including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.tokens.len() + self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> AuthResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AuthError::Storage("store has been shut down".into()));
        }
        Ok(())
    }

    fn insert(&self, map: &DashMap<String, Instant>, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let expires = now + clamp_ttl(ttl);

        let created = match map.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() <= now {
                    entry.insert(expires);
                    true
                } else {
                    // A live entry keeps its original expiry, as with `SET NX`.
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expires);
                true
            }
        };

        if created && map.len() > self.purge_threshold {
            self.purge_expired();
        }
        created
    }

    fn contains(map: &DashMap<String, Instant>, key: &str) -> bool {
        let now = Instant::now();
        let live = match map.get(key) {
            Some(expires) => *expires > now,
            None => return false,
        };
        if !live {
            map.remove_if(key, |_, expires| *expires <= now);
        }
        live
    }
}

impl Default for MemoryRevocationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, token_id: &str, ttl: Duration) -> AuthResult<bool> {
        self.ensure_open()?;
        Ok(self.insert(&self.tokens, token_id, ttl))
    }

    async fn is_revoked(&self, token_id: &str) -> AuthResult<bool> {
        self.ensure_open()?;
        Ok(Self::contains(&self.tokens, token_id))
    }

    async fn revoke_family(&self, family_id: &str, ttl: Duration) -> AuthResult<bool> {
        self.ensure_open()?;
        Ok(self.insert(&self.families, family_id, ttl))
    }

    async fn is_family_revoked(&self, family_id: &str) -> AuthResult<bool> {
        self.ensure_open()?;
        Ok(Self::contains(&self.families, family_id))
    }

    async fn shutdown(&self) -> AuthResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.tokens.clear();
        self.families.clear();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
