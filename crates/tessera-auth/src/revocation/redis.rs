//! Redis-backed revocation store
//!
//! Keys live under `{prefix}:revoked:jti:{id}` and
//! `{prefix}:revoked:family:{id}` and expire through Redis TTLs, so no
//! cleanup job is needed. Inserts use `SET NX EX`, which makes "first
//! revoker wins" hold across every node sharing the server. Each insert
//! writes a unique marker so a retried `SET NX` can recognize its own write.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, trace};
use uuid::Uuid;

use super::RevocationStore;
use crate::error::AuthResult;
use crate::store::clamp_ttl;
use crate::store::redis::RedisConnector;

const JTI_NAMESPACE: &str = "revoked:jti";
const FAMILY_NAMESPACE: &str = "revoked:family";

/// Distributed revocation store
#[derive(Debug, Clone)]
pub struct RedisRevocationStore {
    connector: RedisConnector,
}

impl RedisRevocationStore {
    /// Connect to Redis and namespace keys under `key_prefix`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`](crate::error::AuthError::Storage) if the
    /// server cannot be reached.
    pub async fn connect(url: &str, key_prefix: &str) -> AuthResult<Self> {
        let connector = RedisConnector::connect(url, key_prefix).await?;
        Ok(Self { connector })
    }

    async fn set_nx(&self, key: String, ttl: Duration) -> AuthResult<bool> {
        self.set_nx_marked(key, Uuid::new_v4().to_string(), ttl)
            .await
    }

    /// `SET key marker NX EX ttl`, retried safely
    ///
    /// A retry whose earlier attempt was applied but whose reply was lost
    /// finds its own marker under the key and still reports the win.
    async fn set_nx_marked(&self, key: String, marker: String, ttl: Duration) -> AuthResult<bool> {
        let ttl_secs = clamp_ttl(ttl).as_secs();
        self.connector
            .with_retries(move |mut conn| {
                let key = key.clone();
                let marker = marker.clone();
                Box::pin(async move {
                    let reply: Option<String> = redis::cmd("SET")
                        .arg(&key)
                        .arg(&marker)
                        .arg("NX")
                        .arg("EX")
                        .arg(ttl_secs)
                        .query_async(&mut conn)
                        .await?;
                    if reply.is_some() {
                        return Ok(true);
                    }
                    let current: Option<String> = conn.get(&key).await?;
                    Ok(current.as_deref() == Some(marker.as_str()))
                })
            })
            .await
    }

    async fn exists(&self, key: String) -> AuthResult<bool> {
        self.connector
            .with_retries(move |mut conn| {
                let key = key.clone();
                Box::pin(async move {
                    let exists: bool = conn.exists(&key).await?;
                    Ok(exists)
                })
            })
            .await
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn revoke(&self, token_id: &str, ttl: Duration) -> AuthResult<bool> {
        let created = self
            .set_nx(self.connector.key(JTI_NAMESPACE, token_id), ttl)
            .await?;
        trace!(jti = %token_id, created, "Revocation written");
        Ok(created)
    }

    async fn is_revoked(&self, token_id: &str) -> AuthResult<bool> {
        self.exists(self.connector.key(JTI_NAMESPACE, token_id)).await
    }

    async fn revoke_family(&self, family_id: &str, ttl: Duration) -> AuthResult<bool> {
        let created = self
            .set_nx(self.connector.key(FAMILY_NAMESPACE, family_id), ttl)
            .await?;
        trace!(family = %family_id, created, "Family revocation written");
        Ok(created)
    }

    async fn is_family_revoked(&self, family_id: &str) -> AuthResult<bool> {
        self.exists(self.connector.key(FAMILY_NAMESPACE, family_id))
            .await
    }

    async fn shutdown(&self) -> AuthResult<()> {
        self.connector.close();
        debug!("Redis revocation store shut down");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
