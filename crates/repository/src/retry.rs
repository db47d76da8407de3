//! Bounded retry for idempotent store reads.

use crate::error::{RepositoryError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(250);

fn is_transient(error: &RepositoryError) -> bool {
    matches!(
        error,
        RepositoryError::Storage(silo_storage::StorageError::Io(_))
    )
}

/// Run an idempotent read up to three times with exponential backoff.
/// Non-transient errors (integrity, not-found) fail immediately.
pub async fn retry_read<T, F, Fut>(what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = BASE_DELAY;
    for attempt in 1..=ATTEMPTS {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < ATTEMPTS && is_transient(&e) => {
                warn!("{what} failed (attempt {attempt}/{ATTEMPTS}): {e}");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("loop returns on the last attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> RepositoryError {
        RepositoryError::Storage(silo_storage::StorageError::Io(std::io::Error::other(
            "flaky",
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_read("test read", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_read("test read", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn integrity_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_read("test read", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(silo_core::Error::BadMac.into()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
