//! Reflection: turning a `StepResult` into a verdict.
//!
//! Two providers implement `VerdictProvider`: one asks the reasoning
//! service, the other applies a fixed rule set. `Reflector` tries the
//! first, falls back to the second, and then applies the verdict policy
//! no provider is allowed to override.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ReasoningError;
use crate::gateway::ReasoningGateway;
use crate::llm::ResponseShape;
use crate::prompts;
use crate::types::{
    EntityContext, ReflectionOutcome, Step, StepResult, StepStatus, TaskContext, Verdict, VerdictSource,
};

/// Everything a provider sees when judging one attempt.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionInput<'a> {
    pub entity:       &'a EntityContext,
    pub task:         &'a TaskContext,
    pub step:         &'a Step,
    pub result:       &'a StepResult,
    pub retries_left: u32,
}

#[async_trait]
pub trait VerdictProvider: Send + Sync {
    async fn verdict(&self, input: &ReflectionInput<'_>) -> Result<ReflectionOutcome, ReasoningError>;

    fn name(&self) -> &'static str;
}

// ── LLM-backed ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReplyVerdict {
    Continue,
    Retry,
    Escalate,
}

#[derive(Debug, Deserialize)]
struct VerdictReply {
    verdict:    ReplyVerdict,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    rationale:  String,
}

fn default_confidence() -> f64 {
    0.5
}

pub struct LlmVerdictProvider {
    gateway: Arc<ReasoningGateway>,
}

impl LlmVerdictProvider {
    pub fn new(gateway: Arc<ReasoningGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl VerdictProvider for LlmVerdictProvider {
    async fn verdict(&self, input: &ReflectionInput<'_>) -> Result<ReflectionOutcome, ReasoningError> {
        let prompt = prompts::verdict_prompt(input.entity, input.task, input.step, input.result, input.retries_left);
        let reply: VerdictReply = self.gateway.reason(&prompt, ResponseShape::Verdict).await?;
        let verdict = match reply.verdict {
            ReplyVerdict::Continue => Verdict::Continue,
            ReplyVerdict::Retry    => Verdict::Retry,
            ReplyVerdict::Escalate => Verdict::Escalate,
        };
        Ok(ReflectionOutcome::new(
            &input.step.id,
            input.result.attempt,
            verdict,
            reply.rationale,
            reply.confidence,
            VerdictSource::Reasoning,
        ))
    }

    fn name(&self) -> &'static str {
        "reasoning"
    }
}

// ── Deterministic ───────────────────────────────────────────────────────

/// Rule set used when the reasoning service cannot be asked or fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicVerdictProvider;

impl DeterministicVerdictProvider {
    pub fn decide(&self, input: &ReflectionInput<'_>) -> ReflectionOutcome {
        let result = input.result;
        let (verdict, confidence, rationale) = match (result.status, result.failure) {
            (StepStatus::Success, _) => (Verdict::Continue, 0.85, "step succeeded".to_string()),
            (StepStatus::Partial, _) => (Verdict::Continue, 0.5, "output degraded, continuing with reduced confidence".to_string()),
            (StepStatus::Failure, Some(kind)) if kind.is_transient() => {
                (Verdict::Retry, 0.4, format!("transient failure: {}", kind))
            }
            (_, Some(kind)) => (Verdict::Escalate, 0.2, format!("non-transient failure: {}", kind)),
            (_, None) => (Verdict::Escalate, 0.2, "step produced no usable result".to_string()),
        };
        ReflectionOutcome::new(&input.step.id, result.attempt, verdict, rationale, confidence, VerdictSource::Fallback)
    }
}

#[async_trait]
impl VerdictProvider for DeterministicVerdictProvider {
    async fn verdict(&self, input: &ReflectionInput<'_>) -> Result<ReflectionOutcome, ReasoningError> {
        Ok(self.decide(input))
    }

    fn name(&self) -> &'static str {
        "deterministic"
    }
}

// ── Reflector ───────────────────────────────────────────────────────────

pub struct Reflector {
    primary:  Option<Arc<dyn VerdictProvider>>,
    fallback: DeterministicVerdictProvider,
}

impl Reflector {
    pub fn new(primary: Arc<dyn VerdictProvider>) -> Self {
        Self { primary: Some(primary), fallback: DeterministicVerdictProvider }
    }

    /// Rule set only.
    pub fn deterministic() -> Self {
        Self { primary: None, fallback: DeterministicVerdictProvider }
    }

    pub fn provider_name(&self) -> &'static str {
        self.primary.as_ref().map(|p| p.name()).unwrap_or_else(|| self.fallback.name())
    }

    pub async fn reflect(&self, input: &ReflectionInput<'_>) -> ReflectionOutcome {
        let outcome = match &self.primary {
            Some(provider) => match provider.verdict(input).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(
                        step = %input.step.id,
                        provider = provider.name(),
                        error = %err,
                        "verdict provider failed, using fallback rules"
                    );
                    self.fallback.decide(input)
                }
            },
            None => self.fallback.decide(input),
        };
        enforce_verdict_policy(outcome, input.result)
    }
}

/// Bounds a provider's verdict by what the step actually produced.
///
/// A failed step never continues: a transient failure is retried (the loop
/// turns that into budget exhaustion once retries run out) and any other
/// failure escalates. A retry of a step that produced output continues.
/// `Abort` belongs to the cancellation token, so a provider asking for it
/// escalates instead.
fn enforce_verdict_policy(mut outcome: ReflectionOutcome, result: &StepResult) -> ReflectionOutcome {
    let replacement = match (outcome.verdict, result.status, result.failure) {
        (Verdict::Escalate, _, _) => None,
        (Verdict::Abort, _, _) => Some((Verdict::Escalate, "abort is reserved for cancellation".to_string())),
        (Verdict::Retry, StepStatus::Failure, Some(kind)) if kind.is_transient() => None,
        (_, StepStatus::Failure, Some(kind)) if kind.is_transient() => {
            Some((Verdict::Retry, format!("transient failure ({}) must be retried", kind.as_str())))
        }
        (_, StepStatus::Failure, kind) => Some((
            Verdict::Escalate,
            format!("non-transient failure ({}) must escalate", kind.map(|k| k.as_str()).unwrap_or("unclassified")),
        )),
        (Verdict::Retry, _, _) => Some((Verdict::Continue, "retry refused for a step that produced output".to_string())),
        (Verdict::Continue, _, _) => None,
    };
    if let Some((verdict, reason)) = replacement {
        tracing::warn!(step = %outcome.step_id, from = ?outcome.verdict, to = ?verdict, "verdict overridden by policy");
        outcome.verdict = verdict;
        outcome.rationale = if outcome.rationale.is_empty() { reason } else { format!("{}; {}", reason, outcome.rationale) };
        outcome.source = VerdictSource::Policy;
    }
    outcome
}
