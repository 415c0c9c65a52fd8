pub mod types;
pub mod error;
pub mod config;
pub mod events;
pub mod transitions;
pub mod trace;
pub mod prompts;
pub mod llm;
pub mod gateway;
pub mod tools;
pub mod memory;
pub mod planner;
pub mod reflection;
pub mod engine;
pub mod audit;
pub mod injector;
pub mod harness;
pub mod builder;
pub mod service;
pub mod telemetry;

// Convenience re-exports at crate root
pub use builder::EngineBuilder;
pub use service::{Engine, EngineStatus};
pub use config::{EngineConfig, ExecutionConfig, HarnessConfig, PlannerConfig, ReasoningConfig, ReflectionMode};
pub use engine::AgentLoop;
pub use events::Event;
pub use types::{
    Decision, EntityContext, ExecutionRecord, LoopState, Plan, RecoveryAttempt, RecoveryStrategy,
    ReflectionOutcome, RunSummary, Step, StepResult, StepStatus, TaskContext, Verdict, VerdictSource,
};
pub use gateway::ReasoningGateway;
pub use llm::{ReasoningClient, RetryingReasoningClient, SimulatedAnalyst};
pub use tools::{Directory, FnTool, InMemoryDirectory, Tool, ToolInvoker, ToolOutput, ToolRegistry};
pub use memory::{Memory, MemoryKey, MemoryStore};
pub use planner::Planner;
pub use reflection::{Reflector, VerdictProvider};
pub use audit::{AuditSink, MemoryAuditSink, SqliteAuditSink};
pub use injector::{FailureInjector, FailureType, InjectionConfig};
pub use harness::{BenchmarkConfig, Envelope, EnvelopeStatus, RecoveryConfig, SuiteConfig};
pub use trace::{Trace, TraceEntry};
pub use error::{EngineError, ExecutionError, FailureKind, PlanningError, ReasoningError, ToolError};
