//! Shared Redis connection with bounded retries

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};
use tracing::{debug, error, warn};

use crate::error::{AuthError, AuthResult};

const DEFAULT_MAX_RETRIES: u32 = 3;

/// Multiplexed Redis connection plus key namespace
#[derive(Clone)]
pub(crate) struct RedisConnector {
    conn: MultiplexedConnection,
    key_prefix: String,
    max_retries: u32,
    closed: Arc<AtomicBool>,
}

impl fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConnector")
            .field("key_prefix", &self.key_prefix)
            .field("max_retries", &self.max_retries)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RedisConnector {
    /// Open a connection and check that the server answers `PING`
    pub(crate) async fn connect(url: &str, key_prefix: &str) -> AuthResult<Self> {
        let client = Client::open(url)
            .map_err(|e| AuthError::Storage(format!("Failed to create Redis client: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AuthError::Storage(format!("Failed to connect to Redis: {}", e)))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| AuthError::Storage(format!("Redis ping failed: {}", e)))?;

        debug!(key_prefix, "Redis connection established");

        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// `{prefix}:{namespace}:{id}`
    pub(crate) fn key(&self, namespace: &str, id: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, namespace, id)
    }

    /// Reject all further operations
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Run a Redis operation, retrying failures with linear backoff
    pub(crate) async fn with_retries<F, T>(&self, operation: F) -> AuthResult<T>
    where
        F: Fn(MultiplexedConnection) -> BoxFuture<'static, RedisResult<T>>,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AuthError::Storage("store has been shut down".into()));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;

            match operation(self.conn.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if attempts >= self.max_retries => {
                    error!("Redis operation failed after {} attempts: {}", attempts, e);
                    return Err(e.into());
                }
                Err(e) => {
                    warn!("Redis operation failed (attempt {}): {}", attempts, e);
                    tokio::time::sleep(Duration::from_millis(100 * attempts as u64)).await;
                }
            }
        }
    }
}
