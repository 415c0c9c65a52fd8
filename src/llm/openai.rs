use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

use crate::error::ReasoningError;
use crate::llm::{classify_provider_error, ReasoningClient, ReasoningRequest};

const SYSTEM_PROMPT: &str = "You are the reasoning component of a compliance decision engine. \
    Answer with a single JSON object and nothing else.";

/// Chat-completions client for OpenAI and OpenAI-compatible APIs.
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model:  String,
}

impl OpenAiClient {
    /// Standard OpenAI client using OPENAI_API_KEY env var
    pub fn new(model: impl Into<String>) -> Self {
        Self { client: Client::new(), model: model.into() }
    }

    /// Custom base URL, for Groq, Together, Ollama, Fireworks, etc.
    /// api_base example: "https://api.groq.com/openai/v1"
    pub fn with_base_url(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key);
        Self { client: Client::with_config(config), model: model.into() }
    }

    fn build_messages(request: &ReasoningRequest) -> Result<Vec<ChatCompletionRequestMessage>, ReasoningError> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()
            .map_err(|e| ReasoningError::ServiceUnavailable(format!("failed to build request: {}", e)))?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(request.prompt.clone())
            .build()
            .map_err(|e| ReasoningError::ServiceUnavailable(format!("failed to build request: {}", e)))?;
        Ok(vec![system.into(), user.into()])
    }
}

#[async_trait]
impl ReasoningClient for OpenAiClient {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError> {
        let messages = Self::build_messages(request)?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(messages)
            .build()
            .map_err(|e| ReasoningError::ServiceUnavailable(format!("failed to build request: {}", e)))?;

        tracing::debug!(model = %self.model, shape = request.shape.as_str(), "openai request");

        let response = self.client.chat()
            .create(chat_request)
            .await
            .map_err(|e| classify_provider_error(&format!("OpenAI API error: {}", e)))?;

        let choice = response.choices.into_iter().next()
            .ok_or_else(|| ReasoningError::ServiceUnavailable("empty response from OpenAI".to_string()))?;

        // An empty body is a parse problem, not an outage: let the gateway repair it.
        Ok(choice.message.content.unwrap_or_default())
    }

    fn name(&self) -> &str {
        "openai"
    }
}
