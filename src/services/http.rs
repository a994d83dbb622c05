use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};

use crate::{
    config::IAPConfig,
    error::{ReconcileError, Result},
};

/// Build the shared HTTP client for payment platform calls
pub(crate) fn build_client(config: &IAPConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ReconcileError::Internal(e.into()))
}

/// Retry budget for one outbound call
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub retries: u8,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &IAPConfig) -> Self {
        Self {
            retries: config.retry_attempts,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Send a request, retrying transport failures, 5xx and 429 with linear backoff.
/// Non-retryable responses are returned as-is for the caller to inspect.
pub(crate) async fn send_with_retry<F>(policy: RetryPolicy, label: &str, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder + Send,
{
    let max_attempts = u32::from(policy.retries) + 1;
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        match build().send().await {
            Ok(resp) => {
                let status = resp.status();
                if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                    return Ok(resp);
                }
                last_err = Some(format!("{} error {}", label, status.as_u16()));
                tracing::warn!(label, status = status.as_u16(), attempt, "Retrying platform call");
            }
            Err(e) => {
                last_err = Some(format!("{} request failed: {}", label, e));
                tracing::warn!(label, attempt, "Platform call failed: {}", e);
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(policy.backoff * attempt).await;
        }
    }

    Err(ReconcileError::Validation(
        last_err.unwrap_or_else(|| format!("{} request failed", label)),
    ))
}
