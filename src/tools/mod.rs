use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::ToolError;

mod builtin;

pub use builtin::{
    register_builtin_tools, CalendarTool, DataFetchTool, Directory, EntityLookupTool,
    InMemoryDirectory, TaskLookupTool, TaskRecord, CALENDAR, DATA_FETCH, ENTITY_LOOKUP, TASK_LOOKUP,
};

/// A capability the agent loop can call.
///
/// Tools take structured input and return structured output. They may have
/// side effects at their own boundary (reading a collaborator) but hold no
/// state the registry cares about.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Clear description of what this tool does and when to use it.
    fn description(&self) -> &str;

    /// JSON Schema for the input parameters.
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, input: &Value) -> Result<Value, ToolError>;
}

/// A synchronous closure tool: takes JSON input, returns JSON or a `ToolError`.
pub type ToolFn = Arc<dyn Fn(&Value) -> Result<Value, ToolError> + Send + Sync>;

/// Wraps a closure as a `Tool`. Handy for tests and small adapters.
pub struct FnTool {
    name:        String,
    description: String,
    func:        ToolFn,
}

impl FnTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        func: impl Fn(&Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), description: description.into(), func: Arc::new(func) }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str { &self.name }

    fn description(&self) -> &str { &self.description }

    async fn call(&self, input: &Value) -> Result<Value, ToolError> {
        (self.func)(input)
    }
}

/// Tool schema, as advertised to planners.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub name:         String,
    pub description:  String,
    pub input_schema: Value,
}

/// Result of one successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub tool:     String,
    pub payload:  Value,
    pub success:  bool,
    /// Output was produced but is known to be incomplete.
    pub degraded: bool,
    pub elapsed:  Duration,
}

/// The seam between the agent loop and tools. Implemented by the registry
/// and by decorators around it (fault injection).
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, name: &str, input: Value) -> Result<ToolOutput, ToolError>;

    fn has(&self, name: &str) -> bool;

    fn tool_names(&self) -> Vec<String>;

    /// Schemas advertised to the planner, sorted by name. Bare names unless overridden.
    fn schemas(&self) -> Vec<ToolSchema> {
        self.tool_names()
            .into_iter()
            .map(|name| ToolSchema { name, description: String::new(), input_schema: Value::Null })
            .collect()
    }
}

#[derive(Debug, Default)]
struct ToolMetrics {
    invocations:      AtomicU64,
    failures:         AtomicU64,
    total_latency_us: AtomicU64,
}

/// Point-in-time copy of one tool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToolMetricsSnapshot {
    pub invocations:    u64,
    pub failures:       u64,
    pub avg_latency_ms: f64,
}

/// Registered tool entry
struct ToolEntry {
    tool:    Arc<dyn Tool>,
    metrics: ToolMetrics,
}

/// Exact-match name → tool mapping.
///
/// Tools are registered up front; after that the registry is shared behind
/// an `Arc` and the only thing that changes is the atomic metrics counters.
#[derive(Default)]
pub struct ToolRegistry {
    tools:         HashMap<String, ToolEntry>,
    unknown_calls: AtomicU64,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its own name, replacing any previous tool of that name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, ToolEntry { tool, metrics: ToolMetrics::default() });
    }

    /// Returns the count of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn metrics(&self, name: &str) -> Option<ToolMetricsSnapshot> {
        self.tools.get(name).map(|e| snapshot(&e.metrics))
    }

    pub fn metrics_snapshot(&self) -> BTreeMap<String, ToolMetricsSnapshot> {
        self.tools.iter().map(|(name, e)| (name.clone(), snapshot(&e.metrics))).collect()
    }

    pub fn unknown_calls(&self) -> u64 {
        self.unknown_calls.load(Ordering::Relaxed)
    }
}

fn snapshot(m: &ToolMetrics) -> ToolMetricsSnapshot {
    let invocations = m.invocations.load(Ordering::Relaxed);
    let total_us = m.total_latency_us.load(Ordering::Relaxed);
    ToolMetricsSnapshot {
        invocations,
        failures: m.failures.load(Ordering::Relaxed),
        avg_latency_ms: if invocations == 0 { 0.0 } else { total_us as f64 / invocations as f64 / 1_000.0 },
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, name: &str, input: Value) -> Result<ToolOutput, ToolError> {
        let Some(entry) = self.tools.get(name) else {
            self.unknown_calls.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(tool = name, "unknown tool requested");
            return Err(ToolError::UnknownTool(name.to_string()));
        };

        let started = Instant::now();
        let result = entry.tool.call(&input).await;
        let elapsed = started.elapsed();

        entry.metrics.invocations.fetch_add(1, Ordering::Relaxed);
        entry.metrics.total_latency_us.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        match result {
            Ok(payload) => {
                tracing::debug!(tool = name, elapsed_ms = elapsed.as_millis() as u64, "tool succeeded");
                Ok(ToolOutput { tool: name.to_string(), payload, success: true, degraded: false, elapsed })
            }
            Err(err) => {
                entry.metrics.failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(tool = name, error = %err, "tool failed");
                Err(err)
            }
        }
    }

    fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<_> = self.tools.values().map(|e| ToolSchema {
            name:         e.tool.name().to_string(),
            description:  e.tool.description().to_string(),
            input_schema: e.tool.input_schema(),
        }).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}
