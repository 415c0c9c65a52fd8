//! The reasoning gateway: the only code path that talks to the model service.
//!
//! A call goes out with the shape hint appended, comes back as raw text, and
//! is parsed into the caller's type. Unparseable text triggers bounded
//! repair passes that show the model its own output and the parse error.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ReasoningConfig;
use crate::error::ReasoningError;
use crate::llm::{ReasoningClient, ReasoningRequest, ResponseShape};

pub struct ReasoningGateway {
    client:      Arc<dyn ReasoningClient>,
    timeout:     Duration,
    max_repairs: u32,
}

impl ReasoningGateway {
    pub fn new(client: Arc<dyn ReasoningClient>, config: &ReasoningConfig) -> Self {
        Self {
            client,
            timeout:     Duration::from_millis(config.timeout_ms),
            max_repairs: config.max_repairs,
        }
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    /// Sends `prompt`, expecting a response of `shape`, and deserializes it into `T`.
    pub async fn reason<T: DeserializeOwned>(&self, prompt: &str, shape: ResponseShape) -> Result<T, ReasoningError> {
        let mut request = ReasoningRequest::new(render(prompt, shape), shape);
        let mut last_reason = String::new();

        for pass in 0..=self.max_repairs {
            let raw = self.call(&request).await?;
            match parse_structured::<T>(&raw) {
                Ok(value) => {
                    if pass > 0 {
                        tracing::info!(shape = shape.as_str(), pass, "reasoning output repaired");
                    }
                    return Ok(value);
                }
                Err(reason) => {
                    tracing::warn!(
                        shape = shape.as_str(),
                        pass,
                        max_repairs = self.max_repairs,
                        reason = %reason,
                        "malformed reasoning output"
                    );
                    request = ReasoningRequest {
                        prompt:      render_repair(prompt, shape, &raw, &reason),
                        shape,
                        repair_pass: pass + 1,
                    };
                    last_reason = reason;
                }
            }
        }

        Err(ReasoningError::MalformedOutput {
            attempts: self.max_repairs + 1,
            reason:   last_reason,
        })
    }

    /// Like `reason`, but only requires a JSON object.
    pub async fn reason_value(&self, prompt: &str, shape: ResponseShape) -> Result<Value, ReasoningError> {
        self.reason::<serde_json::Map<String, Value>>(prompt, shape).await.map(Value::Object)
    }

    async fn call(&self, request: &ReasoningRequest) -> Result<String, ReasoningError> {
        match tokio::time::timeout(self.timeout, self.client.complete(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(shape = request.shape.as_str(), timeout_ms = self.timeout.as_millis() as u64, "reasoning call timed out");
                Err(ReasoningError::Timeout(self.timeout))
            }
        }
    }
}

fn render(prompt: &str, shape: ResponseShape) -> String {
    format!(
        "{}\nRespond with a single JSON object only, matching:\n{}\n",
        prompt.trim_end(),
        shape.hint()
    )
}

fn render_repair(prompt: &str, shape: ResponseShape, previous: &str, reason: &str) -> String {
    format!(
        "Your previous response could not be parsed ({}).\n\
         Previous response:\n{}\n\n\
         Original request:\n{}\n\
         Respond again with a single JSON object only, matching:\n{}\n",
        reason,
        previous.trim(),
        prompt.trim_end(),
        shape.hint()
    )
}

/// Locates the JSON object inside a model response.
///
/// Accepts a bare object, a fenced ```json block, or an object embedded in
/// prose (first `{` to last `}`).
pub fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let json = extract_json(raw).ok_or_else(|| "no JSON object found in response".to_string())?;
    serde_json::from_str(json).map_err(|e| format!("response does not match expected shape: {}", e))
}
