use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use crate::audit::AuditSink;
use crate::config::{EngineConfig, ReflectionMode};
use crate::engine::AgentLoop;
use crate::error::EngineError;
use crate::gateway::ReasoningGateway;
use crate::harness::Harness;
use crate::llm::{ReasoningClient, RetryingReasoningClient};
use crate::memory::MemoryStore;
use crate::planner::Planner;
use crate::reflection::{LlmVerdictProvider, Reflector};
use crate::service::Engine;
use crate::tools::{register_builtin_tools, Directory, Tool, ToolInvoker, ToolRegistry};

pub struct EngineBuilder {
    config:    EngineConfig,
    client:    Option<Arc<dyn ReasoningClient>>,
    directory: Option<Arc<dyn Directory>>,
    tools:     Vec<Arc<dyn Tool>>,
    memory:    Option<Arc<MemoryStore>>,
    audit:     Option<Arc<dyn AuditSink>>,
    as_of:     Option<NaiveDate>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config:    EngineConfig::default(),
            client:    None,
            directory: None,
            tools:     Vec::new(),
            memory:    None,
            audit:     None,
            as_of:     None,
        }
    }

    /// Model service used for planning, reflection and reasoning steps.
    pub fn client(mut self, client: Arc<dyn ReasoningClient>) -> Self {
        self.client = Some(client); self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config; self
    }

    pub fn reflection(mut self, mode: ReflectionMode) -> Self {
        self.config.execution.reflection = mode; self
    }

    pub fn max_steps(mut self, n: usize) -> Self {
        self.config.planner.max_steps = n; self
    }

    pub fn retry_budget(mut self, retries: u32) -> Self {
        self.config.execution.default_retry_budget = retries; self
    }

    pub fn tool_timeout_ms(mut self, ms: u64) -> Self {
        self.config.execution.tool_timeout_ms = ms; self
    }

    pub fn backoff_ms(mut self, base: u64, max: u64) -> Self {
        self.config.execution.backoff_base_ms = base;
        self.config.execution.backoff_max_ms = max;
        self
    }

    /// Records behind the built-in tools. Without one, only tools added
    /// through [`EngineBuilder::tool`] are registered.
    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory); self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool); self
    }

    /// Shares an existing memory store instead of creating one.
    pub fn memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory); self
    }

    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink); self
    }

    /// Pins the calendar tool's notion of today.
    pub fn calendar_as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date); self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let config = self.config;
        config.validate()?;

        let mut client = self.client
            .ok_or_else(|| EngineError::Build("reasoning client is required".to_string()))?;
        if config.reasoning.client_retries > 0 {
            client = Arc::new(
                RetryingReasoningClient::new(client, config.reasoning.client_retries)
                    .with_base_delay(Duration::from_millis(config.reasoning.client_backoff_ms)),
            );
        }
        let gateway = Arc::new(ReasoningGateway::new(client, &config.reasoning));

        let mut registry = ToolRegistry::new();
        if let Some(directory) = self.directory {
            register_builtin_tools(&mut registry, directory, self.as_of);
        }
        for tool in self.tools {
            registry.register(tool);
        }
        if registry.is_empty() {
            return Err(EngineError::Build("no tools registered: supply a directory or at least one tool".to_string()));
        }
        let registry = Arc::new(registry);

        let reflector = Arc::new(match config.execution.reflection {
            ReflectionMode::Reasoning     => Reflector::new(Arc::new(LlmVerdictProvider::new(gateway.clone()))),
            ReflectionMode::Deterministic => Reflector::deterministic(),
        });

        let planner = Planner::new(
            gateway.clone(),
            registry.schemas(),
            &config.planner,
            config.execution.default_retry_budget,
        );

        let memory = self.memory.unwrap_or_default();
        let mut agent = AgentLoop::new(gateway.clone(), registry.clone(), reflector.clone(), config.execution.clone())
            .with_memory(memory.clone());
        if let Some(audit) = &self.audit {
            agent = agent.with_audit(audit.clone());
        }

        let harness = Harness::new(
            gateway.clone(),
            reflector.clone(),
            config.planner.clone(),
            config.execution.clone(),
            config.harness.clone(),
        );

        tracing::info!(
            client = gateway.client_name(),
            reflection = reflector.provider_name(),
            tools = registry.len(),
            "engine built"
        );

        Ok(Engine {
            config,
            gateway,
            registry,
            planner,
            agent,
            memory,
            audit: self.audit,
            harness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::SimulatedAnalyst;
    use crate::tools::InMemoryDirectory;

    #[test]
    fn client_is_required() {
        let err = EngineBuilder::new()
            .directory(Arc::new(InMemoryDirectory::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[test]
    fn tools_are_required() {
        let err = EngineBuilder::new()
            .client(Arc::new(SimulatedAnalyst::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Build(_)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = EngineBuilder::new()
            .client(Arc::new(SimulatedAnalyst::new()))
            .directory(Arc::new(InMemoryDirectory::new()))
            .max_steps(0)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn status_lists_builtin_tools() {
        let engine = EngineBuilder::new()
            .client(Arc::new(SimulatedAnalyst::new()))
            .directory(Arc::new(InMemoryDirectory::new()))
            .reflection(ReflectionMode::Deterministic)
            .build()
            .unwrap();
        let status = engine.get_status();
        assert_eq!(status.tools, vec!["calendar", "data_fetch", "entity_lookup", "task_lookup"]);
        assert_eq!(status.reasoning_client, "simulated-analyst");
        assert_eq!(status.components["audit_sink"], false);
        assert_eq!(status.components["tool_registry"], true);
    }
}
