//! In-process session backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{SessionBackend, SessionRecord};
use crate::error::{AuthError, AuthResult};

/// Record count above which inserts trigger a purge of expired sessions
const DEFAULT_PURGE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone)]
struct StoredSession {
    record: SessionRecord,
    expires: Instant,
}

/// Session records in a concurrent map, each with its own expiry
///
/// Expired records read as absent and are removed lazily, plus in bulk
/// whenever the map grows past the purge threshold.
#[derive(Debug)]
pub struct MemorySessionBackend {
    sessions: DashMap<String, StoredSession>,
    purge_threshold: usize,
    closed: AtomicBool,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::with_purge_threshold(DEFAULT_PURGE_THRESHOLD)
    }

    pub fn with_purge_threshold(purge_threshold: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            purge_threshold,
            closed: AtomicBool::new(false),
        }
    }

    /// Drop expired records, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, stored| stored.expires > now);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn ensure_open(&self) -> AuthResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AuthError::Storage("store has been shut down".into()));
        }
        Ok(())
    }
}

impl Default for MemorySessionBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn load(&self, id: &str) -> AuthResult<Option<SessionRecord>> {
        self.ensure_open()?;
        let now = Instant::now();
        let found = self.sessions.get(id).map(|stored| {
            if stored.expires > now {
                Some(stored.record.clone())
            } else {
                None
            }
        });
        match found {
            Some(Some(record)) => Ok(Some(record)),
            Some(None) => {
                self.sessions.remove_if(id, |_, stored| stored.expires <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<()> {
        self.ensure_open()?;
        self.sessions.insert(
            record.id.clone(),
            StoredSession {
                record: record.clone(),
                expires: Instant::now() + ttl,
            },
        );
        if self.sessions.len() > self.purge_threshold {
            let removed = self.purge_expired();
            debug!(removed, "Purged expired sessions");
        }
        Ok(())
    }

    async fn touch(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<bool> {
        self.ensure_open()?;
        let now = Instant::now();
        match self.sessions.get_mut(&record.id) {
            Some(mut stored) if stored.expires > now => {
                stored.record = record.clone();
                stored.expires = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn destroy(&self, id: &str) -> AuthResult<bool> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(self
            .sessions
            .remove(id)
            .is_some_and(|(_, stored)| stored.expires > now))
    }

    async fn shutdown(&self) -> AuthResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.sessions.clear();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ClientInfo;

    #[tokio::test]
    async fn test_save_load_destroy() {
        let backend = MemorySessionBackend::new();
        let record = SessionRecord::new(ClientInfo::default());
        backend.save(&record, Duration::from_secs(60)).await.unwrap();

        assert_eq!(backend.load(&record.id).await.unwrap(), Some(record.clone()));
        assert!(backend.destroy(&record.id).await.unwrap());
        assert_eq!(backend.load(&record.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_record_is_absent() {
        let backend = MemorySessionBackend::new();
        let record = SessionRecord::new(ClientInfo::default());
        backend.save(&record, Duration::from_millis(20)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.load(&record.id).await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let backend = MemorySessionBackend::new();
        let short = SessionRecord::new(ClientInfo::default());
        let long = SessionRecord::new(ClientInfo::default());
        backend.save(&short, Duration::from_millis(10)).await.unwrap();
        backend.save(&long, Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.purge_expired(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_touch_only_updates_live_records() {
        let backend = MemorySessionBackend::new();
        let mut record = SessionRecord::new(ClientInfo::default());
        assert!(!backend.touch(&record, Duration::from_secs(60)).await.unwrap());
        assert!(backend.is_empty());

        backend.save(&record, Duration::from_secs(60)).await.unwrap();
        record.user_id = Some("user-1".into());
        assert!(backend.touch(&record, Duration::from_secs(60)).await.unwrap());
        assert_eq!(backend.load(&record.id).await.unwrap(), Some(record.clone()));

        backend.destroy(&record.id).await.unwrap();
        assert!(!backend.touch(&record, Duration::from_secs(60)).await.unwrap());
        assert_eq!(backend.load(&record.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_threshold_triggers_purge() {
        let backend = MemorySessionBackend::with_purge_threshold(2);
        for _ in 0..2 {
            let record = SessionRecord::new(ClientInfo::default());
            backend.save(&record, Duration::from_millis(10)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let fresh = SessionRecord::new(ClientInfo::default());
        backend.save(&fresh, Duration::from_secs(60)).await.unwrap();
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let backend = MemorySessionBackend::new();
        backend.shutdown().await.unwrap();
        assert!(backend.load("x").await.is_err());
    }
}
