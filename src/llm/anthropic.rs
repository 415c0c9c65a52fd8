use async_trait::async_trait;

use crate::error::ReasoningError;
use crate::llm::{classify_provider_error, ReasoningClient, ReasoningRequest};

const SYSTEM_PROMPT: &str = "You are the reasoning component of a compliance decision engine. \
    Answer with a single JSON object and nothing else.";

// ── Anthropic request types ──────────────────────────────

#[derive(serde::Serialize)]
struct AnthropicRequest<'a> {
    model:      &'a str,
    max_tokens: u32,
    system:     &'a str,
    messages:   Vec<AnthropicMessage<'a>>,
}

#[derive(serde::Serialize)]
struct AnthropicMessage<'a> {
    role:    &'a str,
    content: &'a str,
}

// ── Anthropic response types ─────────────────────────────

#[derive(serde::Deserialize, Debug)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(serde::Deserialize, Debug)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

// ── Client ───────────────────────────────────────────────

/// Messages API client built on `reqwest`.
pub struct AnthropicClient {
    client:     reqwest::Client,
    api_key:    String,
    api_base:   String,
    model:      String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client:     reqwest::Client::new(),
            api_key:    api_key.into(),
            api_base:   "https://api.anthropic.com".to_string(),
            model:      model.into(),
            max_tokens: 2048,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, String> {
        let key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| "ANTHROPIC_API_KEY not set".to_string())?;
        Ok(Self::new(key, model))
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl ReasoningClient for AnthropicClient {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError> {
        let body = AnthropicRequest {
            model:      &self.model,
            max_tokens: self.max_tokens,
            system:     SYSTEM_PROMPT,
            messages:   vec![AnthropicMessage { role: "user", content: &request.prompt }],
        };

        tracing::debug!(model = %self.model, shape = request.shape.as_str(), "anthropic request");

        let response = self.client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| ReasoningError::ServiceUnavailable(format!("Anthropic request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_provider_error(&format!("Anthropic API error {}: {}", status.as_u16(), text)));
        }

        let parsed: AnthropicResponse = response.json().await
            .map_err(|e| ReasoningError::ServiceUnavailable(format!("unreadable Anthropic response: {}", e)))?;

        let text: String = parsed.content.into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");
        Ok(text)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
