use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ReasoningError;

#[cfg(feature = "openai")]
mod openai;
#[cfg(feature = "anthropic")]
mod anthropic;
mod mock;
mod retry;
mod simulated;

#[cfg(feature = "openai")]
pub use openai::OpenAiClient;
#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicClient;
pub use mock::MockReasoningClient;
pub use retry::RetryingReasoningClient;
pub use simulated::SimulatedAnalyst;

/// The structure a reasoning request expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    Plan,
    Verdict,
    StepAnalysis,
}

impl ResponseShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan         => "plan",
            Self::Verdict      => "verdict",
            Self::StepAnalysis => "step_analysis",
        }
    }

    /// JSON skeleton appended to every prompt of this shape.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Plan => r#"{"rationale": string, "steps": [{"id": string, "description": string, "tool": string | null, "depends_on": string | null, "input": object, "retry_budget": integer | null}]}"#,
            Self::Verdict => r#"{"verdict": "continue" | "retry" | "escalate", "confidence": number between 0 and 1, "rationale": string}"#,
            Self::StepAnalysis => r#"{"summary": string, "findings": [string], "recommendation": string}"#,
        }
    }
}

/// One request to the model service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningRequest {
    /// Fully templated prompt text.
    pub prompt:      String,
    pub shape:       ResponseShape,
    /// 0 for the first attempt, n for the n-th repair pass.
    pub repair_pass: u32,
}

impl ReasoningRequest {
    pub fn new(prompt: impl Into<String>, shape: ResponseShape) -> Self {
        Self { prompt: prompt.into(), shape, repair_pass: 0 }
    }
}

/// The single interface between the engine and any language-model service.
///
/// # Contract
/// - Must be Send + Sync (shared behind `Arc<dyn ReasoningClient>`)
/// - Returns the raw model text; parsing and repair belong to the gateway
/// - Classifies transport failures into `ReasoningError` kinds
///   (`RateLimited` for 429s, `ServiceUnavailable` for everything else)
/// - Network and auth details are the implementation's own business
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError>;

    /// Short identifier used in logs and engine status.
    fn name(&self) -> &str {
        "reasoning-client"
    }
}

/// Maps a provider error message onto the reasoning error taxonomy.
pub(crate) fn classify_provider_error(message: &str) -> ReasoningError {
    if RetryingReasoningClient::is_rate_limit_error(message) {
        ReasoningError::RateLimited(message.to_string())
    } else {
        ReasoningError::ServiceUnavailable(message.to_string())
    }
}
