//! Security event bus
//!
//! Components publish [`SecurityEvent`]s to an [`EventBus`]. Every event is
//! emitted as a structured `tracing` record with target `tessera::audit`
//! and forwarded to any live subscribers (alerting, persistence, tests).
//!
//! ## Event Types
//!
//! - Token lifecycle: [`SecurityEvent::TokenIssued`], [`SecurityEvent::TokenRotated`],
//!   [`SecurityEvent::TokenRevoked`], [`SecurityEvent::FamilyRevoked`]
//! - Theft signals: [`SecurityEvent::RefreshReuseDetected`],
//!   [`SecurityEvent::FingerprintMismatch`]
//! - Session lifecycle: [`SecurityEvent::SessionCreated`],
//!   [`SecurityEvent::SessionRegenerated`], [`SecurityEvent::SessionExpired`],
//!   [`SecurityEvent::SessionDestroyed`]
//! - Request rejections: [`SecurityEvent::CsrfRejected`], [`SecurityEvent::RateLimited`]
//!
//! Token values and session ids never appear in events. Tokens are referred
//! to by `jti`, sessions by a short hash of their id.
//!
//! ## Usage
//!
//! ```rust
//! use tessera_auth::audit::{EventBus, SecurityEvent};
//!
//! # async fn example() {
//! let bus = EventBus::new(64);
//! let mut events = bus.subscribe();
//!
//! bus.publish(SecurityEvent::CsrfRejected {
//!     method: "POST".to_string(),
//!     path: "/transfer".to_string(),
//! });
//!
//! let record = events.recv().await.unwrap();
//! assert_eq!(record.event.kind(), "csrf_rejected");
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// Default subscriber buffer size
pub const DEFAULT_CAPACITY: usize = 256;

/// Security-relevant events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    /// New access/refresh pair issued
    TokenIssued {
        subject: String,
        family: String,
        access_jti: String,
        refresh_jti: String,
    },

    /// Refresh token exchanged for a new pair
    TokenRotated {
        subject: String,
        family: String,
        old_jti: String,
        new_refresh_jti: String,
    },

    /// Single token revoked
    TokenRevoked { jti: String, subject: String },

    /// Whole refresh family revoked
    FamilyRevoked { family: String, reason: String },

    /// A refresh token that was already rotated or revoked was presented again
    RefreshReuseDetected {
        subject: String,
        family: Option<String>,
        jti: String,
        family_revoked: bool,
    },

    /// Client signals differ from the ones bound at issuance
    FingerprintMismatch {
        /// `token` or `session`
        scope: String,
        subject: Option<String>,
    },

    SessionCreated { session: String },

    /// Session id replaced, usually on login
    SessionRegenerated {
        old_session: String,
        new_session: String,
        user_id: Option<String>,
    },

    SessionExpired {
        session: String,
        /// `idle` or `max_age`
        reason: String,
    },

    SessionDestroyed { session: String },

    CsrfRejected { method: String, path: String },

    RateLimited { key: String, retry_after_secs: u64 },
}

impl SecurityEvent {
    /// Stable event name
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityEvent::TokenIssued { .. } => "token_issued",
            SecurityEvent::TokenRotated { .. } => "token_rotated",
            SecurityEvent::TokenRevoked { .. } => "token_revoked",
            SecurityEvent::FamilyRevoked { .. } => "family_revoked",
            SecurityEvent::RefreshReuseDetected { .. } => "refresh_reuse_detected",
            SecurityEvent::FingerprintMismatch { .. } => "fingerprint_mismatch",
            SecurityEvent::SessionCreated { .. } => "session_created",
            SecurityEvent::SessionRegenerated { .. } => "session_regenerated",
            SecurityEvent::SessionExpired { .. } => "session_expired",
            SecurityEvent::SessionDestroyed { .. } => "session_destroyed",
            SecurityEvent::CsrfRejected { .. } => "csrf_rejected",
            SecurityEvent::RateLimited { .. } => "rate_limited",
        }
    }

    /// Events that suggest credential theft or an active attack
    pub fn is_suspicious(&self) -> bool {
        matches!(
            self,
            SecurityEvent::RefreshReuseDetected { .. }
                | SecurityEvent::FingerprintMismatch { .. }
                | SecurityEvent::CsrfRejected { .. }
                | SecurityEvent::RateLimited { .. }
        )
    }
}

/// A published event with its id and timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SecurityEvent,
}

/// Publish/subscribe channel for [`SecurityEvent`]s
///
/// Cloning is cheap; all clones share the same channel. Publishing never
/// blocks and never fails: with no subscribers the event is only logged,
/// and slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SecurityRecord>,
}

impl EventBus {
    /// Create a bus whose subscribers buffer up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SecurityRecord> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Log the event and forward it to subscribers
    pub fn publish(&self, event: SecurityEvent) {
        let record = SecurityRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        };
        Self::trace(&record);
        // Err only means nobody is listening.
        let _ = self.sender.send(record);
    }

    fn trace(record: &SecurityRecord) {
        let kind = record.event.kind();
        let details = serde_json::to_string(&record.event).unwrap_or_default();
        if record.event.is_suspicious() {
            warn!(
                target: "tessera::audit",
                audit_id = %record.id,
                event_type = kind,
                details = %details,
                "Security event"
            );
        } else {
            info!(
                target: "tessera::audit",
                audit_id = %record.id,
                event_type = kind,
                details = %details,
                "Security event"
            );
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Short, non-reversible reference to a session id for logs and events
pub fn session_ref(session_id: &str) -> String {
    let digest = Sha256::digest(session_id.as_bytes());
    format!("sess:{}", &hex::encode(digest)[..16])
}
