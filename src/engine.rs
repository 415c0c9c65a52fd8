use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::config::ExecutionConfig;
use crate::error::{EngineError, ExecutionError, FailureKind, ToolError};
use crate::events::Event;
use crate::gateway::ReasoningGateway;
use crate::llm::ResponseShape;
use crate::memory::{MemoryKey, MemoryStore};
use crate::prompts;
use crate::reflection::{ReflectionInput, Reflector};
use crate::tools::ToolInvoker;
use crate::trace::Trace;
use crate::transitions::next_state;
use crate::types::{
    clamp_confidence, Decision, EntityContext, ExecutionRecord, LoopState, Plan, RecoveryAttempt,
    RecoveryStrategy, ReflectionOutcome, Step, StepResult, StepStatus, TaskContext, Verdict,
};

/// Mutable bookkeeping for one run. Dropped once the record is built.
struct RunState {
    trace:       Trace,
    results:     Vec<StepResult>,
    reflections: Vec<ReflectionOutcome>,
    recoveries:  Vec<RecoveryAttempt>,
    /// Attempts made so far, per step.
    attempts:    Vec<u32>,
    /// Latest reflection confidence, per step.
    confidence:  Vec<Option<f64>>,
}

impl RunState {
    fn new(plan_len: usize) -> Self {
        Self {
            trace:       Trace::new(),
            results:     Vec::new(),
            reflections: Vec::new(),
            recoveries:  Vec::new(),
            attempts:    vec![0; plan_len],
            confidence:  vec![None; plan_len],
        }
    }

    /// Resolves `(from, event)` and records the move in the trace.
    fn advance(&mut self, from: LoopState, event: Event, plan_len: usize, data: impl Into<String>) -> Result<LoopState, EngineError> {
        let to = next_state(from, event, plan_len)?;
        tracing::info!(from = %from, event = %event, to = %to, "transition");
        self.trace.log(from.step(), from.name(), event.as_str(), data);
        Ok(to)
    }

    /// Marks open recovery attempts of `step_id` as recovered.
    fn mark_recovered(&mut self, step_id: &str) {
        let now = Utc::now();
        for recovery in self.recoveries.iter_mut().filter(|r| r.step_id == step_id && !r.recovered) {
            recovery.recovered = true;
            recovery.recovery_latency_ms = Some((now - recovery.at).num_milliseconds().max(0) as u64);
        }
    }

    /// Payload of the latest usable result of `step_id`.
    fn payload_of(&self, step_id: &str) -> Option<&Value> {
        self.results.iter().rev()
            .find(|r| r.step_id == step_id && matches!(r.status, StepStatus::Success | StepStatus::Partial))
            .map(|r| &r.payload)
    }
}

type AttemptOutcome = Result<(Value, bool), (FailureKind, String)>;

/// The plan → execute → reflect loop.
///
/// One `run` drives one plan to a terminal state. Steps execute strictly in
/// order; the shared collaborators (tools, memory, audit) may be used by
/// other runs concurrently.
pub struct AgentLoop {
    gateway:   Arc<ReasoningGateway>,
    tools:     Arc<dyn ToolInvoker>,
    reflector: Arc<Reflector>,
    memory:    Option<Arc<MemoryStore>>,
    audit:     Option<Arc<dyn AuditSink>>,
    config:    ExecutionConfig,
}

impl AgentLoop {
    pub fn new(
        gateway: Arc<ReasoningGateway>,
        tools: Arc<dyn ToolInvoker>,
        reflector: Arc<Reflector>,
        config: ExecutionConfig,
    ) -> Self {
        Self { gateway, tools, reflector, memory: None, audit: None, config }
    }

    pub fn with_memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Runs `plan` to a terminal state.
    ///
    /// Tool and reasoning failures never surface as errors; they end up in
    /// the record. The only error is an illegal transition, which would be
    /// a bug in the loop itself.
    pub async fn run(
        &self,
        plan: Plan,
        entity: &EntityContext,
        task: &TaskContext,
        cancel: &CancellationToken,
    ) -> Result<ExecutionRecord, EngineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let len = plan.len();
        let mut run = RunState::new(len);

        tracing::info!(%run_id, entity = %entity.name, task_id = %task.id, steps = len, "run started");

        let mut state = run.advance(LoopState::Planning, Event::PlanReady, len, format!("{} step(s)", len))?;

        while !state.is_terminal() {
            state = match state {
                LoopState::Executing { step } => {
                    if cancel.is_cancelled() {
                        run.advance(state, Event::Cancel, len, "cancelled before step")?
                    } else {
                        run.attempts[step] += 1;
                        let attempt = run.attempts[step];
                        let result = self.execute_step(&plan, step, attempt, entity, task, &run).await;
                        let data = match result.failure {
                            Some(kind) => format!("{} attempt {} {:?} ({})", result.step_id, attempt, result.status, kind),
                            None       => format!("{} attempt {} {:?}", result.step_id, attempt, result.status),
                        };
                        run.results.push(result);
                        run.advance(state, Event::StepFinished, len, data)?
                    }
                }

                LoopState::Reflecting { step } => {
                    let event = self.reflect(&plan, step, entity, task, &mut run).await;
                    let data = run.reflections.last()
                        .map(|r| format!("{:?} ({:.2}) {}", r.verdict, r.confidence, r.rationale))
                        .unwrap_or_default();
                    run.advance(state, event, len, data)?
                }

                LoopState::Retrying { step } => {
                    let delay = self.config.backoff_for(run.attempts[step]);
                    tracing::warn!(step, retry = run.attempts[step], delay_ms = delay.as_millis() as u64, "backing off before retry");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => run.advance(state, Event::Cancel, len, "cancelled during back-off")?,
                        _ = tokio::time::sleep(delay) => {
                            run.advance(state, Event::BackoffElapsed, len, format!("{}ms", delay.as_millis()))?
                        }
                    }
                }

                // Planning is left before the loop and terminal states end it.
                LoopState::Planning | LoopState::Escalated | LoopState::Completed | LoopState::Aborted => break,
            };
        }

        let decision = match state {
            LoopState::Completed => Decision::AutonomousComplete,
            LoopState::Aborted   => Decision::Aborted,
            _                    => Decision::Escalated,
        };

        if decision == Decision::Aborted {
            for (i, step) in plan.steps().iter().enumerate().filter(|(i, _)| run.attempts[*i] == 0) {
                run.results.push(StepResult::skipped(step, i));
            }
        }

        let scored: Vec<f64> = run.confidence.iter().flatten().copied().collect();
        let confidence = if scored.is_empty() {
            0.0
        } else {
            clamp_confidence(scored.iter().sum::<f64>() / scored.len() as f64)
        };

        run.trace.log(None, state.name(), "RunFinished", format!("{} ({:.2})", decision, confidence));

        let record = ExecutionRecord {
            run_id,
            entity: entity.clone(),
            task: task.clone(),
            plan,
            results: run.results,
            reflections: run.reflections,
            recoveries: run.recoveries,
            confidence,
            decision,
            trace: run.trace,
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            %run_id,
            decision = %record.decision,
            confidence = record.confidence,
            attempts = record.results.len(),
            "run finished"
        );

        self.remember(&record).await;
        Ok(record)
    }

    async fn reflect(
        &self,
        plan: &Plan,
        index: usize,
        entity: &EntityContext,
        task: &TaskContext,
        run: &mut RunState,
    ) -> Event {
        let step = &plan.steps()[index];
        let Some(result) = run.results.last().cloned() else {
            return Event::Escalate;
        };
        let retries_used = run.attempts[index].saturating_sub(1);
        let retries_left = step.retry_budget.saturating_sub(retries_used);

        let input = ReflectionInput { entity, task, step, result: &result, retries_left };
        let outcome = self.reflector.reflect(&input).await;

        if matches!(result.status, StepStatus::Success | StepStatus::Partial) {
            run.mark_recovered(&step.id);
        }
        run.confidence[index] = Some(outcome.confidence);

        // Cancel is raised only by the token, never by a verdict.
        let event = match outcome.verdict {
            Verdict::Continue                  => Event::Continue,
            Verdict::Retry if retries_left > 0 => Event::Retry,
            Verdict::Retry                     => Event::BudgetExhausted,
            Verdict::Escalate | Verdict::Abort => Event::Escalate,
        };

        if let Some(kind) = result.failure.filter(|_| result.is_failure()) {
            let (strategy, backoff_ms) = match event {
                Event::Retry    => (
                    RecoveryStrategy::ExponentialBackoffRetry,
                    self.config.backoff_for(run.attempts[index]).as_millis() as u64,
                ),
                Event::Continue => (RecoveryStrategy::Continue, 0),
                _               => (RecoveryStrategy::Escalate, 0),
            };
            run.recoveries.push(RecoveryAttempt {
                step_id: step.id.clone(),
                attempt: result.attempt,
                failure: kind,
                strategy,
                backoff_ms,
                recovered: false,
                recovery_latency_ms: None,
                at: Utc::now(),
            });
        }

        run.reflections.push(outcome);
        event
    }

    async fn execute_step(
        &self,
        plan: &Plan,
        index: usize,
        attempt: u32,
        entity: &EntityContext,
        task: &TaskContext,
        run: &RunState,
    ) -> StepResult {
        let step = &plan.steps()[index];
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.attempt(plan, step, entity, task, run))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic.downcast_ref::<&str>().map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic with non-string payload".to_string());
                let err = ExecutionError::UnhandledError { step: step.id.clone(), message };
                tracing::error!(step = %step.id, error = %err, "step panicked");
                Err((FailureKind::UnhandledError, err.to_string()))
            });

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok((payload, false)) => StepResult::success(step, index, attempt, payload, duration_ms),
            Ok((payload, true))  => StepResult::partial(step, index, attempt, payload, duration_ms),
            Err((kind, message)) => {
                tracing::warn!(step = %step.id, attempt, failure = %kind, error = %message, "step failed");
                StepResult::failure(step, index, attempt, kind, message, duration_ms)
            }
        }
    }

    async fn attempt(
        &self,
        plan: &Plan,
        step: &Step,
        entity: &EntityContext,
        task: &TaskContext,
        run: &RunState,
    ) -> AttemptOutcome {
        let previous = step.depends_on.as_deref().and_then(|id| run.payload_of(id));

        match &step.tool {
            Some(tool) => {
                let input = tool_input(step, entity, task, previous);
                let timeout = self.config.tool_timeout();
                match tokio::time::timeout(timeout, self.tools.invoke(tool, input)).await {
                    Ok(Ok(output)) => Ok((output.payload, output.degraded)),
                    Ok(Err(err)) => Err((err.kind(), err.to_string())),
                    Err(_) => {
                        let err = ToolError::Timeout { tool: tool.clone(), after: timeout };
                        Err((err.kind(), err.to_string()))
                    }
                }
            }
            None => {
                let prior = match previous {
                    Some(payload) => payload.clone(),
                    None => Value::Object(
                        plan.steps().iter()
                            .filter_map(|s| run.payload_of(&s.id).map(|p| (s.id.clone(), p.clone())))
                            .collect(),
                    ),
                };
                let prompt = prompts::step_prompt(entity, task, step, &prior);
                self.gateway.reason_value(&prompt, ResponseShape::StepAnalysis).await
                    .map(|analysis| (analysis, false))
                    .map_err(|err| (err.kind(), err.to_string()))
            }
        }
    }

    async fn remember(&self, record: &ExecutionRecord) {
        let summary = record.summary();

        if let (true, Some(memory)) = (self.config.remember_runs, &self.memory) {
            let key = MemoryKey::derive(&record.entity.name, &record.task.description);
            match serde_json::to_string(&summary) {
                Ok(content) => {
                    memory.save(&key, &record.entity.name, content, summary.headline());
                }
                Err(e) => tracing::warn!(run_id = %record.run_id, error = %e, "could not serialize run summary"),
            }
        }

        if let (true, Some(audit)) = (self.config.audit_runs, &self.audit) {
            if let Err(e) = audit.persist(&summary).await {
                tracing::error!(run_id = %record.run_id, error = %e, "audit sink rejected run summary");
            }
        }
    }
}

/// Context fields, then the step's own input, then the dependency's output
/// under `previous`. Later layers win.
fn tool_input(step: &Step, entity: &EntityContext, task: &TaskContext, previous: Option<&Value>) -> Value {
    let mut input = Map::new();
    input.insert("entity".into(), Value::String(entity.name.clone()));
    input.insert("task_id".into(), Value::String(task.id.clone()));
    if let Some(due) = task.due_date {
        input.insert("due_date".into(), Value::String(due.to_string()));
    }
    if let Value::Object(own) = &step.input {
        input.extend(own.clone());
    }
    if let Some(previous) = previous {
        input.insert("previous".into(), previous.clone());
    }
    Value::Object(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReasoningConfig;
    use crate::llm::SimulatedAnalyst;
    use crate::tools::{FnTool, ToolRegistry};
    use serde_json::json;

    fn agent(registry: ToolRegistry) -> AgentLoop {
        let gateway = Arc::new(ReasoningGateway::new(Arc::new(SimulatedAnalyst::new()), &ReasoningConfig::default()));
        AgentLoop::new(gateway, Arc::new(registry), Arc::new(Reflector::deterministic()), ExecutionConfig::default())
    }

    fn context() -> (EntityContext, TaskContext) {
        (EntityContext::new("Acme", "fintech", "UK"), TaskContext::new("T-1", "Review"))
    }

    #[test]
    fn tool_input_layers_context_step_and_previous() {
        let (entity, task) = context();
        let step = Step::tool("s2", "x", "data_fetch").with_input(json!({ "resource": "r", "entity": "Override" }));
        let input = tool_input(&step, &entity, &task, Some(&json!({ "n": 1 })));
        assert_eq!(input["entity"], "Override");
        assert_eq!(input["task_id"], "T-1");
        assert_eq!(input["resource"], "r");
        assert_eq!(input["previous"]["n"], 1);
        assert!(input.get("due_date").is_none());
    }

    #[tokio::test]
    async fn dependency_output_is_passed_forward() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new("first", "", |_| Ok(json!({ "token": "abc" })))));
        registry.register(Arc::new(FnTool::new("second", "", |input| {
            match input["previous"]["token"].as_str() {
                Some("abc") => Ok(json!({ "ok": true })),
                _ => Err(ToolError::InvalidInput("missing token".into())),
            }
        })));
        let plan = Plan::new(vec![
            Step::tool("a", "first", "first"),
            Step::tool("b", "second", "second").after("a"),
        ]);
        let (entity, task) = context();
        let record = agent(registry).run(plan, &entity, &task, &CancellationToken::new()).await.unwrap();
        assert_eq!(record.decision, Decision::AutonomousComplete);
    }

    #[tokio::test]
    async fn reasoning_steps_see_all_prior_payloads() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new("lookup", "", |_| Ok(json!({ "found": true })))));
        let plan = Plan::new(vec![
            Step::tool("a", "lookup", "lookup"),
            Step::reasoning("b", "Synthesize findings"),
        ]);
        let (entity, task) = context();
        let record = agent(registry).run(plan, &entity, &task, &CancellationToken::new()).await.unwrap();
        assert_eq!(record.decision, Decision::AutonomousComplete);
        assert!(record.final_results()[1].payload["summary"].is_string());
    }

    #[tokio::test]
    async fn panicking_tool_becomes_unhandled_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new("boom", "", |_| panic!("tool exploded"))));
        let plan = Plan::new(vec![Step::tool("a", "boom", "boom")]);
        let (entity, task) = context();
        let record = agent(registry).run(plan, &entity, &task, &CancellationToken::new()).await.unwrap();
        assert_eq!(record.decision, Decision::Escalated);
        assert_eq!(record.results[0].failure, Some(FailureKind::UnhandledError));
        assert!(record.results[0].error.as_deref().unwrap().contains("tool exploded"));
    }

    #[tokio::test]
    async fn empty_plan_is_an_invalid_transition() {
        let (entity, task) = context();
        let err = agent(ToolRegistry::new())
            .run(Plan::new(Vec::new()), &entity, &task, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }
}
