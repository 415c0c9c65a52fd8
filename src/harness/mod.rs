//! Benchmark and test harness.
//!
//! Every harness run builds a sandbox tool registry over synthetic
//! scenario records, then drives Planner + AgentLoop per scenario with
//! bounded concurrency. Nothing here touches the production registry,
//! memory store or audit sink.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{ExecutionConfig, HarnessConfig, PlannerConfig};
use crate::engine::AgentLoop;
use crate::error::{EngineError, PlanningError};
use crate::gateway::ReasoningGateway;
use crate::injector::{FailureInjector, InjectionConfig};
use crate::planner::Planner;
use crate::reflection::Reflector;
use crate::tools::{register_builtin_tools, ToolInvoker, ToolRegistry};
use crate::types::ExecutionRecord;

mod recovery;
mod report;
mod scenarios;

pub use recovery::{RecoveryReport, RecoveryTimeline};
pub use report::{correction_counts, BenchmarkReport, ScenarioResult, Scores, SuiteReport};
pub use scenarios::{
    deterministic_scenarios, harness_as_of, scenario_directory, Complexity, ComplexityMix, Scenario,
    ScenarioGenerator, SCENARIO_SET_VERSION,
};

// ── Envelope ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Completed,
    Timeout,
    Error,
}

/// Uniform wrapper around every harness report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status:    EnvelopeStatus,
    pub results:   Option<T>,
    pub error:     Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> Envelope<T> {
    pub fn completed(results: T) -> Self {
        Self { status: EnvelopeStatus::Completed, results: Some(results), error: None, timestamp: Utc::now() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self { status: EnvelopeStatus::Timeout, results: None, error: Some(message.into()), timestamp: Utc::now() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: EnvelopeStatus::Error, results: None, error: Some(message.into()), timestamp: Utc::now() }
    }

    pub fn is_completed(&self) -> bool {
        self.status == EnvelopeStatus::Completed
    }
}

/// Runs `fut` under an optional overall deadline and wraps the outcome.
pub async fn enveloped<T>(
    timeout_ms: Option<u64>,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Envelope<T> {
    let outcome = match timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), fut).await {
            Ok(outcome) => outcome,
            Err(_) => return Envelope::timeout(format!("harness run exceeded {}ms", ms)),
        },
        None => fut.await,
    };
    match outcome {
        Ok(results) => Envelope::completed(results),
        Err(e) => Envelope::error(e.to_string()),
    }
}

// ── Run configurations ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    pub include_deterministic: bool,
    pub random_scenarios:      usize,
    pub mix:                   ComplexityMix,
    /// Falls back to the harness seed.
    pub seed:                  Option<u64>,
    /// Deadline for the whole run.
    pub timeout_ms:            Option<u64>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self { include_deterministic: true, random_scenarios: 0, mix: ComplexityMix::default(), seed: None, timeout_ms: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// How many times the scenario batch is run.
    pub iterations:       usize,
    pub random_scenarios: usize,
    pub mix:              ComplexityMix,
    pub seed:             Option<u64>,
    pub timeout_ms:       Option<u64>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self { iterations: 1, random_scenarios: 10, mix: ComplexityMix::default(), seed: None, timeout_ms: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub injection:        InjectionConfig,
    /// Generated scenarios; 0 uses the deterministic set.
    #[serde(default)]
    pub random_scenarios: usize,
    #[serde(default)]
    pub timeout_ms:       Option<u64>,
}

impl RecoveryConfig {
    pub fn new(injection: InjectionConfig) -> Self {
        Self { injection, random_scenarios: 0, timeout_ms: None }
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

pub struct Harness {
    gateway:   Arc<ReasoningGateway>,
    reflector: Arc<Reflector>,
    planner:   PlannerConfig,
    execution: ExecutionConfig,
    config:    HarnessConfig,
}

impl Harness {
    pub fn new(
        gateway: Arc<ReasoningGateway>,
        reflector: Arc<Reflector>,
        planner: PlannerConfig,
        execution: ExecutionConfig,
        config: HarnessConfig,
    ) -> Self {
        Self { gateway, reflector, planner, execution, config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Deterministic set (optionally) followed by seeded random scenarios.
    pub fn scenarios(&self, include_deterministic: bool, random: usize, mix: &ComplexityMix, seed: Option<u64>) -> Result<Vec<Scenario>, EngineError> {
        mix.validate()?;
        let mut scenarios = if include_deterministic { deterministic_scenarios() } else { Vec::new() };
        let seed = seed.unwrap_or(self.config.seed);
        scenarios.extend(ScenarioGenerator::new(seed).generate(random, mix));
        if scenarios.is_empty() {
            return Err(EngineError::Config("no scenarios selected".into()));
        }
        Ok(scenarios)
    }

    fn sandbox(scenarios: &[Scenario]) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, Arc::new(scenario_directory(scenarios)), Some(harness_as_of()));
        Arc::new(registry)
    }

    /// Plans and runs one scenario under the per-scenario deadline.
    async fn drive(&self, scenario: &Scenario, tools: Arc<dyn ToolInvoker>) -> (ScenarioResult, Option<ExecutionRecord>) {
        let started = Instant::now();
        let planner = Planner::new(
            self.gateway.clone(),
            tools.schemas(),
            &self.planner,
            self.execution.default_retry_budget,
        );
        let agent = AgentLoop::new(self.gateway.clone(), tools, self.reflector.clone(), self.execution.clone());
        let cancel = CancellationToken::new();

        let run = async {
            let plan = planner.plan(&scenario.entity, &scenario.task).await?;
            let record = agent.run(plan, &scenario.entity, &scenario.task, &cancel).await?;
            Ok::<_, EngineError>(record)
        };
        let deadline = Duration::from_millis(self.config.scenario_timeout_ms);
        let outcome = tokio::time::timeout(deadline, run).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(record)) => {
                tracing::debug!(scenario = %scenario.id, decision = %record.decision, elapsed_ms = elapsed, "scenario finished");
                (ScenarioResult::from_record(scenario, &record, elapsed), Some(record))
            }
            Ok(Err(err)) => {
                tracing::warn!(scenario = %scenario.id, error = %err, "scenario failed");
                (ScenarioResult::errored(scenario, error_class(&err), elapsed), None)
            }
            Err(_) => {
                tracing::warn!(scenario = %scenario.id, timeout_ms = self.config.scenario_timeout_ms, "scenario timed out");
                (ScenarioResult::timed_out(scenario, elapsed), None)
            }
        }
    }

    pub async fn run_suite(&self, scenarios: Vec<Scenario>) -> SuiteReport {
        let tools = Self::sandbox(&scenarios);
        tracing::info!(scenarios = scenarios.len(), concurrency = self.config.concurrency, "suite started");

        let results: Vec<ScenarioResult> = stream::iter(scenarios.iter())
            .map(|scenario| {
                let tools: Arc<dyn ToolInvoker> = tools.clone();
                async move { self.drive(scenario, tools).await.0 }
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let report = SuiteReport::from_results(results);
        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            success_rate = report.success_rate,
            "suite finished"
        );
        report
    }

    pub async fn run_benchmark(&self, config: &BenchmarkConfig) -> Result<BenchmarkReport, EngineError> {
        let scenarios = self.scenarios(true, config.random_scenarios, &config.mix, config.seed)?;
        let iterations = config.iterations.max(1);

        let mut results = Vec::with_capacity(scenarios.len() * iterations);
        for iteration in 0..iterations {
            tracing::info!(iteration = iteration + 1, of = iterations, "benchmark iteration");
            results.extend(self.run_suite(scenarios.clone()).await.results);
        }
        Ok(BenchmarkReport::from_suite(SuiteReport::from_results(results), iterations))
    }

    pub async fn run_recovery(&self, config: &RecoveryConfig) -> Result<RecoveryReport, EngineError> {
        config.injection.validate()?;
        let scenarios = if config.random_scenarios == 0 {
            deterministic_scenarios()
        } else {
            self.scenarios(false, config.random_scenarios, &ComplexityMix::default(), None)?
        };
        let registry = Self::sandbox(&scenarios);

        tracing::info!(
            failure = %config.injection.failure,
            rate = config.injection.rate,
            target = ?config.injection.target_tool,
            scenarios = scenarios.len(),
            "recovery simulation started"
        );

        let timelines: Vec<Result<RecoveryTimeline, EngineError>> = stream::iter(scenarios.iter().enumerate())
            .map(|(i, scenario)| {
                let registry: Arc<dyn ToolInvoker> = registry.clone();
                let injection = config.injection.clone().with_seed(config.injection.seed.wrapping_add(i as u64));
                async move {
                    let injector = Arc::new(FailureInjector::new(registry, injection)?);
                    let (result, record) = self.drive(scenario, injector.clone()).await;
                    Ok::<_, EngineError>(match record {
                        Some(record) => RecoveryTimeline::from_record(scenario, &record, injector.events()),
                        None => RecoveryTimeline::failed(scenario, injector.events(), result.errors.join(", ")),
                    })
                }
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let timelines = timelines.into_iter().collect::<Result<Vec<_>, _>>()?;
        let report = RecoveryReport::from_timelines(config.injection.clone(), timelines);
        tracing::info!(
            injected = report.injected_faults,
            attempts = report.recovery_attempts,
            recovery_rate = report.recovery_rate,
            "recovery simulation finished"
        );
        Ok(report)
    }
}

fn error_class(err: &EngineError) -> String {
    match err {
        EngineError::Planning(PlanningError::Reasoning(e))       => format!("planning_{}", e.kind()),
        EngineError::Planning(PlanningError::InvalidPlanShape(_)) => "invalid_plan_shape".to_string(),
        EngineError::InvalidTransition { .. }                    => "invalid_transition".to_string(),
        EngineError::Build(_) | EngineError::Config(_)           => "engine_error".to_string(),
    }
}
