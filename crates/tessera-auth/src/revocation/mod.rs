//! Revocation store
//!
//! An expiring set of revoked token ids (`jti`) and revoked token families.
//! Entries expire on their own once the revoked token could no longer
//! verify anyway, so the store never grows beyond the set of live tokens.
//!
//! Two backends implement [`RevocationStore`]:
//!
//! - [`MemoryRevocationStore`] for a single process
//! - `RedisRevocationStore` (feature `redis-storage`) for a shared, distributed store
//!
//! Both insert atomically: [`RevocationStore::revoke`] returns `true` only for
//! the caller that created the entry. Refresh-token rotation relies on this to
//! let exactly one of several concurrent rotations win.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{StoreBackendConfig, StoreConfig};
use crate::error::AuthResult;

pub mod memory;
#[cfg(feature = "redis-storage")]
pub mod redis;

pub use memory::MemoryRevocationStore;
#[cfg(feature = "redis-storage")]
pub use self::redis::RedisRevocationStore;

/// Storage for revoked token ids and families
#[async_trait]
pub trait RevocationStore: Send + Sync + Debug {
    /// Revoke a token id for `ttl` (zero is clamped to one second)
    ///
    /// Returns `true` if this call created the entry, `false` if the id was
    /// already revoked. An existing entry keeps its original expiry.
    async fn revoke(&self, token_id: &str, ttl: Duration) -> AuthResult<bool>;

    async fn is_revoked(&self, token_id: &str) -> AuthResult<bool>;

    /// Revoke every refresh token of a family for `ttl`
    async fn revoke_family(&self, family_id: &str, ttl: Duration) -> AuthResult<bool>;

    async fn is_family_revoked(&self, family_id: &str) -> AuthResult<bool>;

    /// Release resources; later calls fail with a storage error
    async fn shutdown(&self) -> AuthResult<()>;

    /// Backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Build the revocation store selected by configuration
///
/// # Errors
///
/// Returns [`AuthError::Configuration`](crate::error::AuthError::Configuration)
/// if Redis is selected without the `redis-storage` feature, or
/// [`AuthError::Storage`](crate::error::AuthError::Storage) if the Redis
/// server cannot be reached.
pub async fn build_revocation_store(config: &StoreConfig) -> AuthResult<Arc<dyn RevocationStore>> {
    match &config.backend {
        StoreBackendConfig::Memory => Ok(Arc::new(MemoryRevocationStore::new())),
        #[cfg(feature = "redis-storage")]
        StoreBackendConfig::Redis { url, key_prefix } => {
            Ok(Arc::new(RedisRevocationStore::connect(url, key_prefix).await?))
        }
        #[cfg(not(feature = "redis-storage"))]
        StoreBackendConfig::Redis { .. } => Err(crate::error::AuthError::Configuration(
            "redis backend requires the `redis-storage` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_memory_store() {
        let store = build_revocation_store(&StoreConfig::default()).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
        assert!(store.revoke("j1", Duration::from_secs(10)).await.unwrap());
        assert!(store.is_revoked("j1").await.unwrap());
    }

    #[cfg(not(feature = "redis-storage"))]
    #[tokio::test]
    async fn test_redis_without_feature_is_config_error() {
        let config = StoreConfig {
            backend: StoreBackendConfig::Redis {
                url: "redis://127.0.0.1".into(),
                key_prefix: "t".into(),
            },
            ..Default::default()
        };
        let err = build_revocation_store(&config).await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }
}
