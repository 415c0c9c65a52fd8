use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditSink;
use crate::builder::EngineBuilder;
use crate::config::{EngineConfig, ReflectionMode};
use crate::engine::AgentLoop;
use crate::error::EngineError;
use crate::gateway::ReasoningGateway;
use crate::harness::{
    enveloped, BenchmarkConfig, BenchmarkReport, Envelope, Harness, RecoveryConfig, RecoveryReport,
    SuiteConfig, SuiteReport, SCENARIO_SET_VERSION,
};
use crate::memory::MemoryStore;
use crate::planner::Planner;
use crate::tools::{ToolInvoker, ToolRegistry};
use crate::types::{EntityContext, ExecutionRecord, TaskContext};

/// Static capability flags, one per component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub version:              &'static str,
    pub scenario_set_version: &'static str,
    pub reasoning_client:     String,
    pub reflection:           ReflectionMode,
    pub components:           BTreeMap<&'static str, bool>,
    pub tools:                Vec<String>,
    pub memory_entries:       usize,
}

/// The engine facade: production analysis plus the validation harnesses.
///
/// Built once per process with [`EngineBuilder`]; every method takes `&self`,
/// so an `Arc<Engine>` can serve concurrent requests.
pub struct Engine {
    pub(crate) config:   EngineConfig,
    pub(crate) gateway:  Arc<ReasoningGateway>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) planner:  Planner,
    pub(crate) agent:    AgentLoop,
    pub(crate) memory:   Arc<MemoryStore>,
    pub(crate) audit:    Option<Arc<dyn AuditSink>>,
    pub(crate) harness:  Harness,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    /// Plans and runs one analysis. Only planning failures are errors.
    ///
    /// Summaries of the entity's most recent remembered runs go into the
    /// planning prompt.
    pub async fn run_agentic_analysis(&self, entity: &EntityContext, task: &TaskContext) -> Result<ExecutionRecord, EngineError> {
        self.run_agentic_analysis_with_cancel(entity, task, &CancellationToken::new()).await
    }

    pub async fn run_agentic_analysis_with_cancel(
        &self,
        entity: &EntityContext,
        task: &TaskContext,
        cancel: &CancellationToken,
    ) -> Result<ExecutionRecord, EngineError> {
        let prior: Vec<String> = self.memory
            .recent_for(&entity.name, self.config.planner.prior_runs)
            .into_iter()
            .map(|m| m.summary)
            .collect();
        tracing::info!(entity = %entity.name, task_id = %task.id, prior_runs = prior.len(), "analysis requested");

        let plan = self.planner.plan_with_history(entity, task, &prior).await?;
        self.agent.run(plan, entity, task, cancel).await
    }

    pub async fn run_test_suite(&self, config: &SuiteConfig) -> Envelope<SuiteReport> {
        enveloped(config.timeout_ms, async {
            let scenarios = self.harness.scenarios(
                config.include_deterministic,
                config.random_scenarios,
                &config.mix,
                config.seed,
            )?;
            Ok::<_, EngineError>(self.harness.run_suite(scenarios).await)
        }).await
    }

    pub async fn run_benchmarks(&self, config: &BenchmarkConfig) -> Envelope<BenchmarkReport> {
        enveloped(config.timeout_ms, self.harness.run_benchmark(config)).await
    }

    pub async fn run_recovery_simulation(&self, config: &RecoveryConfig) -> Envelope<RecoveryReport> {
        enveloped(config.timeout_ms, self.harness.run_recovery(config)).await
    }

    pub fn get_status(&self) -> EngineStatus {
        let components = BTreeMap::from([
            ("reasoning_gateway", true),
            ("planner", true),
            ("agent_loop", true),
            ("tool_registry", !self.registry.is_empty()),
            ("memory_store", self.config.execution.remember_runs),
            ("audit_sink", self.audit.is_some() && self.config.execution.audit_runs),
            ("failure_injector", true),
            ("benchmark_harness", true),
        ]);
        EngineStatus {
            version:              env!("CARGO_PKG_VERSION"),
            scenario_set_version: SCENARIO_SET_VERSION,
            reasoning_client:     self.gateway.client_name().to_string(),
            reflection:           self.config.execution.reflection,
            components,
            tools:                self.registry.tool_names(),
            memory_entries:       self.memory.len(),
        }
    }
}
