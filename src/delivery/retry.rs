//! Retry of remote calls.
//!
//! Transient failures are retried with exponential backoff up to the
//! configured number of retries; running out of retries turns the error
//! into a permanent one. Permanent failures are not retried.

use std::future::Future;
use std::time::Duration;

use backon::Retryable;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{ReportError, ReportResult};
use crate::remote::{RemoteError, RemoteOp, RemoteResult};

/// Runs a remote call, retrying transient failures.
///
/// `call` is invoked once per attempt and must build a fresh future each
/// time.
pub async fn call_with_retry<T, F, Fut>(
    config: &RetryConfig,
    op: RemoteOp,
    call: F,
) -> ReportResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    call.retry(config.backoff())
        .sleep(tokio::time::sleep)
        .when(RemoteError::is_transient)
        .notify(|e: &RemoteError, delay: Duration| {
            warn!("{} failed, retrying in {:?}: {}", op, delay, e);
        })
        .await
        .map_err(|e| match e {
            RemoteError::Transient(msg) => ReportError::PermanentRemote(format!(
                "{} still failing after {} retries: {}",
                op, config.max_retries, msg
            )),
            RemoteError::Permanent(msg) => ReportError::PermanentRemote(format!("{}: {}", op, msg)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_retries: usize) -> RetryConfig {
        RetryConfig {
            max_retries,
            min_delay_ms: 1,
            max_delay_ms: 2,
            factor: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result = call_with_retry(&fast(3), RemoteOp::AppendLog, move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RemoteError::Transient("503".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_permanent() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result: ReportResult<()> = call_with_retry(&fast(2), RemoteOp::UploadFile, move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Transient("timeout".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ReportError::PermanentRemote(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result: ReportResult<()> = call_with_retry(&fast(5), RemoteOp::CreateResult, move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Permanent("400".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ReportError::PermanentRemote(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
