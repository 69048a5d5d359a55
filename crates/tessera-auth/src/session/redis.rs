//! Redis session backend
//!
//! Records are stored as JSON under `{prefix}:session:{id}` with
//! `SET .. EX`, so Redis drops them once they lapse. Updates use
//! `SET .. XX EX` and never recreate a destroyed session.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use super::{SessionBackend, SessionRecord};
use crate::error::{AuthError, AuthResult};
use crate::store::clamp_ttl;
use crate::store::redis::RedisConnector;

const SESSION_NAMESPACE: &str = "session";

/// Distributed session backend
#[derive(Debug, Clone)]
pub struct RedisSessionBackend {
    connector: RedisConnector,
}

impl RedisSessionBackend {
    /// Connect to Redis and namespace keys under `key_prefix`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the server cannot be reached.
    pub async fn connect(url: &str, key_prefix: &str) -> AuthResult<Self> {
        let connector = RedisConnector::connect(url, key_prefix).await?;
        Ok(Self { connector })
    }
}

#[async_trait]
impl SessionBackend for RedisSessionBackend {
    async fn load(&self, id: &str) -> AuthResult<Option<SessionRecord>> {
        let key = self.connector.key(SESSION_NAMESPACE, id);
        let raw: Option<String> = self
            .connector
            .with_retries(move |mut conn| {
                let key = key.clone();
                Box::pin(async move {
                    let value: Option<String> = conn.get(&key).await?;
                    Ok(value)
                })
            })
            .await?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| AuthError::Storage(format!("corrupt session record: {e}")))
        })
        .transpose()
    }

    async fn save(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<()> {
        let key = self.connector.key(SESSION_NAMESPACE, &record.id);
        let json = serde_json::to_string(record)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize session: {e}")))?;
        let ttl_secs = clamp_ttl(ttl).as_secs();

        self.connector
            .with_retries(move |mut conn| {
                let key = key.clone();
                let json = json.clone();
                Box::pin(async move {
                    let _: () = conn.set_ex(&key, json, ttl_secs).await?;
                    Ok(())
                })
            })
            .await
    }

    async fn touch(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<bool> {
        let key = self.connector.key(SESSION_NAMESPACE, &record.id);
        let json = serde_json::to_string(record)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize session: {e}")))?;
        let ttl_secs = clamp_ttl(ttl).as_secs();

        self.connector
            .with_retries(move |mut conn| {
                let key = key.clone();
                let json = json.clone();
                Box::pin(async move {
                    let reply: Option<String> = redis::cmd("SET")
                        .arg(&key)
                        .arg(json)
                        .arg("XX")
                        .arg("EX")
                        .arg(ttl_secs)
                        .query_async(&mut conn)
                        .await?;
                    Ok(reply.is_some())
                })
            })
            .await
    }

    async fn destroy(&self, id: &str) -> AuthResult<bool> {
        let key = self.connector.key(SESSION_NAMESPACE, id);
        self.connector
            .with_retries(move |mut conn| {
                let key = key.clone();
                Box::pin(async move {
                    let removed: u64 = conn.del(&key).await?;
                    Ok(removed > 0)
                })
            })
            .await
    }

    async fn shutdown(&self) -> AuthResult<()> {
        self.connector.close();
        debug!("Redis session backend shut down");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
