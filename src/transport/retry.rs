//! Retry and batch helpers over fallible API calls

use super::error::ApiError;
use futures::future::join_all;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Run `op` up to `max_retries` times in total.
///
/// Only retryable kinds (network, server, rate limit, unknown) are retried;
/// client errors, auth failures and cancellation return immediately. The
/// wait after failed attempt `n` is `base_delay * n`. The last error is
/// returned once attempts run out.
pub async fn retry_request<T, F, Fut>(
    mut op: F,
    max_retries: u32,
    base_delay: Duration,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let max_retries = max_retries.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.kind.is_retryable() || attempt >= max_retries => return Err(e),
            Err(e) => {
                let delay = base_delay * attempt;
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_ms = %delay.as_millis(),
                    kind = ?e.kind,
                    error = %e.message,
                    "Retrying request"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Outcome of one operation in a batch
#[derive(Debug, Clone)]
pub struct BatchItem<T> {
    pub index: usize,
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// Run every operation concurrently and report each outcome in input order.
/// A failing item never fails the batch.
pub async fn batch_requests<T, Fut, I>(ops: I) -> Vec<BatchItem<T>>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, ApiError>>,
{
    join_all(ops)
        .await
        .into_iter()
        .enumerate()
        .map(|(index, result)| match result {
            Ok(data) => BatchItem {
                index,
                success: true,
                data: Some(data),
                error: None,
            },
            Err(error) => BatchItem {
                index,
                success: false,
                data: None,
                error: Some(error),
            },
        })
        .collect()
}
