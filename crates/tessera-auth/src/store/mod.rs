//! Helpers shared by the revocation and session backends

use std::future::Future;
use std::time::Duration;

use tracing::error;

use crate::error::{AuthError, AuthResult};

#[cfg(feature = "redis-storage")]
pub(crate) mod redis;

/// Smallest TTL written to a backend
pub(crate) const MIN_TTL: Duration = Duration::from_secs(1);

/// Clamp a zero (or sub-second) TTL up to one second
pub(crate) fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.max(MIN_TTL)
}

/// Run a store operation with an upper time bound
///
/// An elapsed timer becomes [`AuthError::Storage`], so callers handle slow
/// backends the same way as failing ones.
pub(crate) async fn bounded<T, F>(operation: &'static str, timeout: Duration, fut: F) -> AuthResult<T>
where
    F: Future<Output = AuthResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            error!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "Store operation timed out"
            );
            Err(AuthError::Storage(format!(
                "{operation} timed out after {}ms",
                timeout.as_millis()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_ttl() {
        assert_eq!(clamp_ttl(Duration::ZERO), Duration::from_secs(1));
        assert_eq!(clamp_ttl(Duration::from_millis(10)), Duration::from_secs(1));
        assert_eq!(clamp_ttl(Duration::from_secs(30)), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let value = bounded("op", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result: AuthResult<()> = bounded("slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AuthError::Storage(msg)) if msg.contains("slow")));
    }
}
