use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ReasoningError;
use crate::llm::{ReasoningClient, ReasoningRequest};

/// A wrapper around any `ReasoningClient` that retries transient failures
/// with exponential back-off.
///
/// Malformed output is never retried here: repairs are the gateway's job.
pub struct RetryingReasoningClient {
    inner:       Arc<dyn ReasoningClient>,
    max_retries: u32,
    base_delay:  Duration,
}

impl RetryingReasoningClient {
    pub fn new(inner: Arc<dyn ReasoningClient>, max_retries: u32) -> Self {
        Self { inner, max_retries, base_delay: Duration::from_secs(1) }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub(crate) fn is_auth_error(err: &str) -> bool {
        let lower = err.to_lowercase();
        lower.contains("401")
            || lower.contains("403")
            || lower.contains("authentication")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("invalid api key")
    }

    pub(crate) fn is_rate_limit_error(err: &str) -> bool {
        let lower = err.to_lowercase();
        lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("token_quota_exceeded")
            || lower.contains("queue_exceeded")
            || lower.contains("limit exceeded")
    }

    fn should_retry(err: &ReasoningError) -> bool {
        match err {
            ReasoningError::RateLimited(_) => true,
            ReasoningError::ServiceUnavailable(msg) => !Self::is_auth_error(msg),
            ReasoningError::Timeout(_) => true,
            ReasoningError::MalformedOutput { .. } => false,
        }
    }

    fn delay_for(&self, err: &ReasoningError, attempt: u32) -> Duration {
        // Rate limits get a longer initial wait
        let base = match err {
            ReasoningError::RateLimited(_) => self.base_delay * 5,
            _ => self.base_delay,
        };
        let factor = 1u32 << attempt.min(10);
        std::cmp::min(base.saturating_mul(factor), Duration::from_secs(60))
    }
}

#[async_trait]
impl ReasoningClient for RetryingReasoningClient {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request).await {
                Ok(text) => return Ok(text),
                Err(e) if !Self::should_retry(&e) => {
                    tracing::error!(error = %e, "reasoning client error, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= self.max_retries => {
                    tracing::warn!(retries = self.max_retries, error = %e, "reasoning client retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let wait = self.delay_for(&e, attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max     = self.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        error   = %e,
                        "reasoning client transient error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockReasoningClient, ResponseShape};

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_then_succeeds() {
        let mock = Arc::new(MockReasoningClient::new(vec![
            Err(ReasoningError::RateLimited("429 Too Many Requests".into())),
            Err(ReasoningError::ServiceUnavailable("502 bad gateway".into())),
            Ok("{}".into()),
        ]));
        let client = RetryingReasoningClient::new(mock.clone(), 3);
        let out = client.complete(&ReasoningRequest::new("p", ResponseShape::Verdict)).await;
        assert_eq!(out.unwrap(), "{}");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_errors_are_not_retried() {
        let mock = Arc::new(MockReasoningClient::new(vec![
            Err(ReasoningError::ServiceUnavailable("401 Unauthorized".into())),
            Ok("{}".into()),
        ]));
        let client = RetryingReasoningClient::new(mock.clone(), 3);
        let out = client.complete(&ReasoningRequest::new("p", ResponseShape::Plan)).await;
        assert!(matches!(out, Err(ReasoningError::ServiceUnavailable(_))));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let mock = Arc::new(MockReasoningClient::new(vec![
            Err(ReasoningError::RateLimited("429".into())),
            Err(ReasoningError::RateLimited("429".into())),
            Err(ReasoningError::RateLimited("429".into())),
        ]));
        let client = RetryingReasoningClient::new(mock.clone(), 1);
        let out = client.complete(&ReasoningRequest::new("p", ResponseShape::Plan)).await;
        assert!(matches!(out, Err(ReasoningError::RateLimited(_))));
        assert_eq!(mock.call_count(), 2);
    }
}
