use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ReasoningError;
use crate::llm::{ReasoningClient, ReasoningRequest, ResponseShape};

type Responder = Box<dyn Fn(&ReasoningRequest) -> Result<String, ReasoningError> + Send + Sync>;

/// Scripted model client for tests.
///
/// Programmed responses are consumed in order; once they run out the
/// optional responder closure answers, and without one every call fails
/// with `ServiceUnavailable`.
pub struct MockReasoningClient {
    responses: Mutex<VecDeque<Result<String, ReasoningError>>>,
    responder: Option<Responder>,
    delay:     Option<Duration>,
    call_log:  Mutex<Vec<ReasoningRequest>>,
}

impl MockReasoningClient {
    pub fn new(responses: Vec<Result<String, ReasoningError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            responder: None,
            delay:     None,
            call_log:  Mutex::new(Vec::new()),
        }
    }

    pub fn from_texts<S: Into<String>>(texts: Vec<S>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(t.into())).collect())
    }

    pub fn with_responder(
        responder: impl Fn(&ReasoningRequest) -> Result<String, ReasoningError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new(Vec::new())
        }
    }

    /// Sleeps before every response; pairs with paused tokio time in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the number of times complete() was invoked
    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    pub fn calls_for(&self, shape: ResponseShape) -> usize {
        self.call_log.lock().unwrap().iter().filter(|r| r.shape == shape).count()
    }

    /// Returns the Nth request received (0-indexed)
    pub fn request(&self, n: usize) -> Option<ReasoningRequest> {
        self.call_log.lock().unwrap().get(n).cloned()
    }
}

#[async_trait]
impl ReasoningClient for MockReasoningClient {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError> {
        self.call_log.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.responses.lock().unwrap().pop_front();
        match (scripted, &self.responder) {
            (Some(response), _)    => response,
            (None, Some(responder)) => responder(request),
            (None, None) => Err(ReasoningError::ServiceUnavailable(
                "MockReasoningClient: no more programmed responses".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
