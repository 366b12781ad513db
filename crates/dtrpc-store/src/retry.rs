//! Flat 1-second retry for transient store errors (§4.1, §7).
//!
//! Unlike the exponential-backoff retry used elsewhere in the workspace for
//! sidecar connection handshakes, the overlay's transient failures (dropped
//! connections, invalid tokens, JSON framing) are retried by callers with a
//! flat 1-second backoff for as long as the caller's own loop keeps polling.

use dtrpc_error::DtrpcError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry `op` forever while it returns a retryable [`DtrpcError`], sleeping
/// one second between attempts. Returns immediately on success or on a
/// non-retryable (fatal) error.
pub async fn retry_transient<T, F, Fut>(mut op: F) -> Result<T, DtrpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DtrpcError>>,
{
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                warn!(target: "dtrpc.store.retry", error = %err, "transient store error, retrying in 1s");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtrpc_error::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_immediately_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, DtrpcError> = retry_transient(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, DtrpcError> = retry_transient(|| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(DtrpcError::new(ErrorCode::TransportUnavailable, "down"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_fatal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, DtrpcError> = retry_transient(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DtrpcError::new(ErrorCode::AuthUnauthorized, "nope")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
