use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::FailureKind;
use crate::trace::Trace;

/// A state of the plan → execute → reflect machine.
///
/// Step indices are positions in the plan being executed. `Escalated`,
/// `Completed` and `Aborted` are terminal: no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopState {
    Planning,
    Executing { step: usize },
    Reflecting { step: usize },
    Retrying { step: usize },
    Escalated,
    Completed,
    Aborted,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Escalated | Self::Completed | Self::Aborted)
    }

    /// Name without the step index, used as the trace `state` column.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Planning         => "Planning",
            Self::Executing { .. }  => "Executing",
            Self::Reflecting { .. } => "Reflecting",
            Self::Retrying { .. }   => "Retrying",
            Self::Escalated        => "Escalated",
            Self::Completed        => "Completed",
            Self::Aborted          => "Aborted",
        }
    }

    pub fn step(&self) -> Option<usize> {
        match self {
            Self::Executing { step } | Self::Reflecting { step } | Self::Retrying { step } => Some(*step),
            _ => None,
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.step() {
            Some(step) => write!(f, "{}({})", self.name(), step),
            None       => f.write_str(self.name()),
        }
    }
}

// ── Collaborator contexts ───────────────────────────────────────────────

/// Read-only entity record supplied by the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityContext {
    pub name:          String,
    pub category:      String,
    pub jurisdiction:  String,
    #[serde(default)]
    pub history_flags: Vec<String>,
}

impl EntityContext {
    pub fn new(name: impl Into<String>, category: impl Into<String>, jurisdiction: impl Into<String>) -> Self {
        Self {
            name:          name.into(),
            category:      category.into(),
            jurisdiction:  jurisdiction.into(),
            history_flags: Vec::new(),
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.history_flags.push(flag.into());
        self
    }
}

/// Read-only task record supplied by the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub id:          String,
    pub description: String,
    #[serde(default)]
    pub due_date:    Option<NaiveDate>,
}

impl TaskContext {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self { id: id.into(), description: description.into(), due_date: None }
    }

    pub fn due(mut self, date: NaiveDate) -> Self {
        self.due_date = Some(date);
        self
    }
}

// ── Plan ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolCall,
    ReasoningCall,
}

/// One unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id:           String,
    pub description:  String,
    /// Expected tool; `None` marks a reasoning-only step.
    pub tool:         Option<String>,
    pub input:        Value,
    /// Id of an earlier step whose output this step consumes.
    pub depends_on:   Option<String>,
    /// Retries allowed after the first attempt.
    pub retry_budget: u32,
}

impl Step {
    pub fn tool(id: impl Into<String>, description: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id:           id.into(),
            description:  description.into(),
            tool:         Some(tool.into()),
            input:        Value::Object(Default::default()),
            depends_on:   None,
            retry_budget: crate::config::DEFAULT_RETRY_BUDGET,
        }
    }

    pub fn reasoning(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id:           id.into(),
            description:  description.into(),
            tool:         None,
            input:        Value::Object(Default::default()),
            depends_on:   None,
            retry_budget: crate::config::DEFAULT_RETRY_BUDGET,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn after(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on = Some(step_id.into());
        self
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn kind(&self) -> StepKind {
        if self.tool.is_some() { StepKind::ToolCall } else { StepKind::ReasoningCall }
    }
}

/// Ordered, immutable list of steps produced once per execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    steps:     Vec<Step>,
    rationale: Option<String>,
}

impl Plan {
    /// Builds a plan without validation. The planner validates model output
    /// before calling this.
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps, rationale: None }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn rationale(&self) -> Option<&str> {
        self.rationale.as_deref()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn index_of(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }
}

// ── Results ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Partial,
    /// Never executed because the run was aborted first.
    Skipped,
}

/// Outcome of one attempt at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id:     String,
    pub step_index:  usize,
    /// 1-based attempt number; 0 for skipped steps.
    pub attempt:     u32,
    pub status:      StepStatus,
    pub payload:     Value,
    pub tool:        Option<String>,
    pub duration_ms: u64,
    pub failure:     Option<FailureKind>,
    pub error:       Option<String>,
}

impl StepResult {
    pub fn success(step: &Step, index: usize, attempt: u32, payload: Value, duration_ms: u64) -> Self {
        Self {
            step_id: step.id.clone(),
            step_index: index,
            attempt,
            status: StepStatus::Success,
            payload,
            tool: step.tool.clone(),
            duration_ms,
            failure: None,
            error: None,
        }
    }

    pub fn partial(step: &Step, index: usize, attempt: u32, payload: Value, duration_ms: u64) -> Self {
        Self {
            status:  StepStatus::Partial,
            failure: Some(FailureKind::DegradedOutput),
            ..Self::success(step, index, attempt, payload, duration_ms)
        }
    }

    pub fn failure(
        step: &Step, index: usize, attempt: u32,
        kind: FailureKind, error: impl Into<String>, duration_ms: u64,
    ) -> Self {
        Self {
            step_id: step.id.clone(),
            step_index: index,
            attempt,
            status: StepStatus::Failure,
            payload: Value::Null,
            tool: step.tool.clone(),
            duration_ms,
            failure: Some(kind),
            error: Some(error.into()),
        }
    }

    pub fn skipped(step: &Step, index: usize) -> Self {
        Self {
            step_id: step.id.clone(),
            step_index: index,
            attempt: 0,
            status: StepStatus::Skipped,
            payload: Value::Null,
            tool: step.tool.clone(),
            duration_ms: 0,
            failure: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    pub fn is_failure(&self) -> bool {
        self.status == StepStatus::Failure
    }
}

// ── Reflection ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Continue,
    Retry,
    Escalate,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Reasoning,
    Fallback,
    Policy,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionOutcome {
    pub step_id:    String,
    pub attempt:    u32,
    pub verdict:    Verdict,
    pub rationale:  String,
    /// Always within [0, 1].
    pub confidence: f64,
    pub source:     VerdictSource,
}

impl ReflectionOutcome {
    pub fn new(
        step_id: impl Into<String>, attempt: u32, verdict: Verdict,
        rationale: impl Into<String>, confidence: f64, source: VerdictSource,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            attempt,
            verdict,
            rationale: rationale.into(),
            confidence: clamp_confidence(confidence),
            source,
        }
    }
}

/// Clamps to [0, 1]; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

// ── Recovery ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    ExponentialBackoffRetry,
    Escalate,
    Continue,
}

/// The loop's reaction to one failed step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub step_id:             String,
    pub attempt:             u32,
    pub failure:             FailureKind,
    pub strategy:            RecoveryStrategy,
    pub backoff_ms:          u64,
    /// Set once a later attempt of the same step succeeds.
    pub recovered:           bool,
    pub recovery_latency_ms: Option<u64>,
    pub at:                  DateTime<Utc>,
}

// ── Execution record ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AutonomousComplete,
    Escalated,
    Aborted,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Self::AutonomousComplete => "autonomous-complete",
            Self::Escalated          => "escalated",
            Self::Aborted            => "aborted",
        })
    }
}

/// Full trace of one run. Built by the agent loop and never mutated after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id:      Uuid,
    pub entity:      EntityContext,
    pub task:        TaskContext,
    pub plan:        Plan,
    pub results:     Vec<StepResult>,
    pub reflections: Vec<ReflectionOutcome>,
    pub recoveries:  Vec<RecoveryAttempt>,
    pub confidence:  f64,
    pub decision:    Decision,
    pub trace:       Trace,
    pub started_at:  DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Last result recorded for each executed step, in plan order.
    pub fn final_results(&self) -> Vec<&StepResult> {
        (0..self.plan.len())
            .filter_map(|i| self.results.iter().rev().find(|r| r.step_index == i))
            .collect()
    }

    pub fn results_for(&self, step_id: &str) -> Vec<&StepResult> {
        self.results.iter().filter(|r| r.step_id == step_id).collect()
    }

    /// Attempts beyond the first, summed over all steps.
    pub fn retries(&self) -> usize {
        self.results.iter().filter(|r| r.attempt > 1).count()
    }

    pub fn reflection_passes(&self) -> usize {
        self.reflections.len()
    }

    pub fn tools_used(&self) -> BTreeSet<String> {
        self.results.iter()
            .filter(|r| r.status != StepStatus::Skipped)
            .filter_map(|r| r.tool.clone())
            .collect()
    }

    pub fn failure_reasons(&self) -> Vec<String> {
        self.results.iter()
            .filter_map(|r| r.failure.map(|kind| match &r.error {
                Some(msg) => format!("{} [{}]: {}", r.step_id, kind, msg),
                None      => format!("{} [{}]", r.step_id, kind),
            }))
            .collect()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id:      self.run_id,
            entity:      self.entity.name.clone(),
            task_id:     self.task.id.clone(),
            task:        self.task.description.clone(),
            decision:    self.decision,
            confidence:  self.confidence,
            steps:       self.plan.len(),
            attempts:    self.results.iter().filter(|r| r.attempt > 0).count(),
            failures:    self.failure_reasons(),
            finished_at: self.finished_at,
        }
    }
}

/// Compact, persistable digest of an `ExecutionRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id:      Uuid,
    pub entity:      String,
    pub task_id:     String,
    pub task:        String,
    pub decision:    Decision,
    pub confidence:  f64,
    pub steps:       usize,
    pub attempts:    usize,
    pub failures:    Vec<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// One-line human readable form stored as the memory summary.
    pub fn headline(&self) -> String {
        let mut line = format!(
            "{} for '{}' on '{}' (confidence {:.2}, {} step(s), {} attempt(s))",
            self.decision, self.entity, self.task, self.confidence, self.steps, self.attempts
        );
        if let Some(first) = self.failures.first() {
            line.push_str(&format!("; first failure: {}", first));
        }
        line
    }
}
