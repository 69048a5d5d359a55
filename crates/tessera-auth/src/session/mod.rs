//! Server-side sessions
//!
//! [`SessionStore`] implements the session lifecycle (create, validate,
//! regenerate, destroy) on top of a pluggable [`SessionBackend`]:
//!
//! - [`MemorySessionBackend`] keeps records in process
//! - `RedisSessionBackend` (feature `redis-storage`) stores JSON records with a TTL
//!
//! Sessions expire after `idle_timeout` without activity or `max_age`
//! after creation, whichever comes first. The client fingerprint seen on
//! the first validated request is bound to the session; a later mismatch is
//! logged and published but does not end the session.
//!
//! Session ids travel in a signed cookie (see [`SessionCookie`]), so a
//! client cannot choose its own id.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audit::{EventBus, SecurityEvent, session_ref};
use crate::config::{SessionConfig, StoreBackendConfig, StoreConfig};
use crate::error::{AuthError, AuthResult};
use crate::fingerprint::fingerprints_match;
use crate::store::{bounded, clamp_ttl};

mod cookie;
pub mod memory;
#[cfg(feature = "redis-storage")]
pub mod redis;

pub use cookie::SessionCookie;
pub use memory::MemorySessionBackend;
#[cfg(feature = "redis-storage")]
pub use self::redis::RedisSessionBackend;

/// A stored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// 32 random bytes, hex encoded
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl SessionRecord {
    fn new(client: ClientInfo) -> Self {
        let now = Utc::now();
        Self {
            id: new_session_id(),
            created_at: now,
            last_activity: now,
            user_id: None,
            fingerprint: client.fingerprint,
            client_ip: client.ip,
            data: HashMap::new(),
        }
    }

    /// Deserialize a payload value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Store a payload value; call [`SessionStore::save`] to persist it
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SessionInvalid`] if the value cannot be serialized.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) -> AuthResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| AuthError::SessionInvalid(format!("unserializable value: {e}")))?;
        self.data.insert(key.into(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.data.remove(key)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Client signals captured when a session is created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub fingerprint: Option<String>,
    pub ip: Option<String>,
}

/// Persistence for session records
#[async_trait]
pub trait SessionBackend: Send + Sync + Debug {
    async fn load(&self, id: &str) -> AuthResult<Option<SessionRecord>>;

    /// Insert or replace a record, expiring it after `ttl`
    async fn save(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<()>;

    /// Replace a record only if it still exists, resetting its expiry
    ///
    /// Returns `false` when the id is gone (destroyed, regenerated or
    /// expired). The check and the write are one atomic step.
    async fn touch(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<bool>;

    /// Returns `true` if a record was removed
    async fn destroy(&self, id: &str) -> AuthResult<bool>;

    /// Release resources; later calls fail with a storage error
    async fn shutdown(&self) -> AuthResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Build the session backend selected by configuration
///
/// # Errors
///
/// Returns [`AuthError::Configuration`] if Redis is selected without the
/// `redis-storage` feature, or [`AuthError::Storage`] if the Redis server
/// cannot be reached.
pub async fn build_session_backend(config: &StoreConfig) -> AuthResult<Arc<dyn SessionBackend>> {
    match &config.backend {
        StoreBackendConfig::Memory => Ok(Arc::new(MemorySessionBackend::new())),
        #[cfg(feature = "redis-storage")]
        StoreBackendConfig::Redis { url, key_prefix } => {
            Ok(Arc::new(RedisSessionBackend::connect(url, key_prefix).await?))
        }
        #[cfg(not(feature = "redis-storage"))]
        StoreBackendConfig::Redis { .. } => Err(AuthError::Configuration(
            "redis backend requires the `redis-storage` feature".into(),
        )),
    }
}

/// 32 random bytes, hex encoded
pub fn new_session_id() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// How long a lapsed record stays stored so validation can report it as expired
pub const DEFAULT_EXPIRY_GRACE: Duration = Duration::from_secs(60);

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Session lifecycle on top of a [`SessionBackend`]
#[derive(Debug, Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    max_age: Duration,
    idle_timeout: Duration,
    expiry_grace: Duration,
    store_timeout: Duration,
    events: EventBus,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>, config: &SessionConfig) -> Self {
        Self {
            backend,
            max_age: config.max_age(),
            idle_timeout: config.idle_timeout(),
            expiry_grace: DEFAULT_EXPIRY_GRACE,
            store_timeout: StoreConfig::default().timeout(),
            events: EventBus::default(),
        }
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Keep lapsed records this long past their idle or max-age deadline
    #[must_use]
    pub fn with_expiry_grace(mut self, grace: Duration) -> Self {
        self.expiry_grace = grace;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn backend(&self) -> &Arc<dyn SessionBackend> {
        &self.backend
    }

    /// Create and persist an empty session
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the record cannot be saved.
    pub async fn create(&self, client: ClientInfo) -> AuthResult<SessionRecord> {
        let record = SessionRecord::new(client);
        self.insert(&record).await?;

        debug!(session = %session_ref(&record.id), "Session created");
        self.events.publish(SecurityEvent::SessionCreated {
            session: session_ref(&record.id),
        });
        Ok(record)
    }

    /// Load a session without touching its activity timestamp
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] on backend failure or timeout.
    pub async fn get(&self, id: &str) -> AuthResult<Option<SessionRecord>> {
        bounded("session_load", self.store_timeout, self.backend.load(id)).await
    }

    /// Persist changes to an existing session
    ///
    /// A session destroyed or regenerated in the meantime is not written
    /// back.
    ///
    /// # Errors
    ///
    /// - [`AuthError::SessionInvalid`] if the session no longer exists
    /// - [`AuthError::Storage`] on backend failure or timeout
    pub async fn save(&self, record: &SessionRecord) -> AuthResult<()> {
        let ttl = self.storage_ttl(record);
        let updated =
            bounded("session_touch", self.store_timeout, self.backend.touch(record, ttl)).await?;
        if !updated {
            return Err(AuthError::SessionInvalid("session not found".into()));
        }
        Ok(())
    }

    async fn insert(&self, record: &SessionRecord) -> AuthResult<()> {
        let ttl = self.storage_ttl(record);
        bounded("session_save", self.store_timeout, self.backend.save(record, ttl)).await
    }

    /// Time until the record lapses by idle timeout or max age, plus grace
    fn storage_ttl(&self, record: &SessionRecord) -> Duration {
        let now = Utc::now();
        let idle_left = self
            .idle_timeout
            .saturating_sub(elapsed(record.last_activity, now));
        let age_left = self.max_age.saturating_sub(elapsed(record.created_at, now));
        clamp_ttl(idle_left.min(age_left) + self.expiry_grace)
    }

    /// Remove a session; returns `true` if it existed
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] on backend failure or timeout.
    pub async fn destroy(&self, id: &str) -> AuthResult<bool> {
        let removed =
            bounded("session_destroy", self.store_timeout, self.backend.destroy(id)).await?;
        if removed {
            self.events.publish(SecurityEvent::SessionDestroyed {
                session: session_ref(id),
            });
        }
        Ok(removed)
    }

    /// Move a session to a new id, keeping its payload and bindings
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SessionInvalid`] if `old_id` does not exist, or
    /// [`AuthError::Storage`] on backend failure.
    pub async fn regenerate(&self, old_id: &str) -> AuthResult<SessionRecord> {
        self.regenerate_as(old_id, None).await
    }

    /// Regenerate the session and bind it to `user_id`
    ///
    /// Call on every privilege change (login, sudo) to prevent fixation.
    ///
    /// # Errors
    ///
    /// Same as [`regenerate`](Self::regenerate).
    pub async fn login(&self, old_id: &str, user_id: impl Into<String>) -> AuthResult<SessionRecord> {
        self.regenerate_as(old_id, Some(user_id.into())).await
    }

    async fn regenerate_as(&self, old_id: &str, user_id: Option<String>) -> AuthResult<SessionRecord> {
        let old = self
            .get(old_id)
            .await?
            .ok_or_else(|| AuthError::SessionInvalid("session not found".into()))?;

        let now = Utc::now();
        let record = SessionRecord {
            id: new_session_id(),
            created_at: now,
            last_activity: now,
            user_id: user_id.or(old.user_id),
            fingerprint: old.fingerprint,
            client_ip: old.client_ip,
            data: old.data,
        };

        // New record first, so a failed save leaves the old session usable.
        self.insert(&record).await?;
        bounded("session_destroy", self.store_timeout, self.backend.destroy(old_id)).await?;

        debug!(
            old = %session_ref(old_id),
            new = %session_ref(&record.id),
            "Session regenerated"
        );
        self.events.publish(SecurityEvent::SessionRegenerated {
            old_session: session_ref(old_id),
            new_session: session_ref(&record.id),
            user_id: record.user_id.clone(),
        });
        Ok(record)
    }

    /// Validate a session for the current request and record activity
    ///
    /// # Errors
    ///
    /// - [`AuthError::SessionInvalid`] if the session does not exist
    /// - [`AuthError::SessionExpired`] if it was idle too long or outlived
    ///   its max age (the session is destroyed)
    /// - [`AuthError::Storage`] on backend failure
    pub async fn validate(&self, id: &str, fingerprint: Option<&str>) -> AuthResult<SessionRecord> {
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| AuthError::SessionInvalid("session not found".into()))?;

        let now = Utc::now();
        let expiry = if elapsed(record.last_activity, now) > self.idle_timeout {
            Some("idle")
        } else if elapsed(record.created_at, now) > self.max_age {
            Some("max_age")
        } else {
            None
        };
        if let Some(reason) = expiry {
            bounded("session_destroy", self.store_timeout, self.backend.destroy(id)).await?;
            debug!(session = %session_ref(id), reason, "Session expired");
            self.events.publish(SecurityEvent::SessionExpired {
                session: session_ref(id),
                reason: reason.to_string(),
            });
            return Err(AuthError::SessionExpired);
        }

        match (record.fingerprint.as_deref(), fingerprint) {
            (None, Some(presented)) => record.fingerprint = Some(presented.to_string()),
            (Some(bound), Some(presented)) if !fingerprints_match(bound, presented) => {
                warn!(
                    session = %session_ref(id),
                    user_id = ?record.user_id,
                    "Session fingerprint mismatch"
                );
                self.events.publish(SecurityEvent::FingerprintMismatch {
                    scope: "session".to_string(),
                    subject: record.user_id.clone(),
                });
            }
            _ => {}
        }

        record.last_activity = now;
        self.save(&record).await?;
        Ok(record)
    }

    /// Shut down the backend
    ///
    /// # Errors
    ///
    /// Returns the backend's shutdown error, if any.
    pub async fn shutdown(&self) -> AuthResult<()> {
        self.backend.shutdown().await
    }
}
