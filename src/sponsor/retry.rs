//! Retry policy and error classification for paymaster calls

use std::future::Future;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::warn;

use super::SponsorError;

/// Exponential backoff settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Growth factor per failure
    pub multiplier: u32,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy for action batches: 5 attempts, 1s doubling to at most 30s
    pub const fn transactions() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Policy for account deployments: 3 attempts starting at 2s
    pub const fn deployment() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Delay to wait after the `failed_attempt`-th failure (1-based)
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1);
        let factor = self.multiplier.checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, SponsorError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SponsorError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    warn!(
                        operation = %operation,
                        attempts = attempt,
                        error = %e,
                        "Retry budget exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = %operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable paymaster failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transactions()
    }
}

/// Map a paymaster HTTP status (and error body) to a sponsor error
pub fn classify_status(status: u16, body: &JsonValue) -> SponsorError {
    let (message, retryable) = match status {
        429 => ("Rate limit exceeded".to_string(), true),
        503 => ("Service temporarily unavailable".to_string(), true),
        502 => ("Bad gateway".to_string(), true),
        500 => ("Internal server error".to_string(), true),
        401 => ("Invalid API key".to_string(), false),
        400 => (
            format!(
                "Bad request: {}",
                error_detail(body).unwrap_or_else(|| "Invalid data".to_string())
            ),
            false,
        ),
        402 => ("Insufficient credits".to_string(), false),
        other => (format!("Unknown error: {}", other), other >= 500),
    };

    if retryable {
        SponsorError::Retryable { status, message }
    } else {
        SponsorError::NonRetryable { status, message }
    }
}

/// Pull a human readable message out of an error body
fn error_detail(body: &JsonValue) -> Option<String> {
    match body.get("error") {
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(obj @ JsonValue::Object(_)) => obj
            .get("message")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .or_else(|| Some(obj.to_string())),
        _ => body
            .get("message")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
    }
}
