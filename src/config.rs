use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Retries granted to a step when the plan does not say otherwise.
pub const DEFAULT_RETRY_BUDGET: u32 = 2;

/// Top-level engine configuration.
///
/// Every section has defaults, so a partial JSON document only needs to
/// name the fields it overrides:
///
/// ```
/// use decisionloop::EngineConfig;
/// let config = EngineConfig::from_json_str(r#"{ "execution": { "tool_timeout_ms": 500 } }"#).unwrap();
/// assert_eq!(config.execution.tool_timeout_ms, 500);
/// assert_eq!(config.planner.max_steps, 7);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reasoning: ReasoningConfig,
    pub planner:   PlannerConfig,
    pub execution: ExecutionConfig,
    pub harness:   HarnessConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Timeout for a single request to the model service.
    pub timeout_ms:     u64,
    /// Re-prompts allowed after an unparseable response.
    pub max_repairs:    u32,
    /// Client-level retries for rate limits and outages (0 = no wrapper).
    pub client_retries: u32,
    /// Base delay for client-level retries.
    pub client_backoff_ms: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            timeout_ms:        30_000,
            max_repairs:       2,
            client_retries:    0,
            client_backoff_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Shortest plan accepted from the model.
    pub min_steps:  usize,
    /// Longest plan accepted from the model.
    pub max_steps:  usize,
    /// Remembered runs of the same entity shown to the planner; 0 shows none.
    pub prior_runs: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { min_steps: 3, max_steps: 7, prior_runs: 5 }
    }
}

/// How reflection verdicts are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionMode {
    /// Ask the reasoning service, falling back to the rule set on failure.
    Reasoning,
    /// Rule set only; no reasoning calls during reflection.
    Deterministic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub tool_timeout_ms:      u64,
    pub default_retry_budget: u32,
    pub backoff_base_ms:      u64,
    pub backoff_max_ms:       u64,
    pub reflection:           ReflectionMode,
    /// Write a summary of every finished run to the memory store.
    pub remember_runs:        bool,
    /// Forward a summary of every finished run to the audit sink.
    pub audit_runs:           bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms:      10_000,
            default_retry_budget: DEFAULT_RETRY_BUDGET,
            backoff_base_ms:      250,
            backoff_max_ms:       8_000,
            reflection:           ReflectionMode::Reasoning,
            remember_runs:        true,
            audit_runs:           true,
        }
    }
}

impl ExecutionConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    /// Delay before retry number `retry` (1-based): base · 2^(retry-1), capped.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(20);
        let delay = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Per-scenario time limit.
    pub scenario_timeout_ms: u64,
    /// Upper bound on scenarios run at once.
    pub concurrency:         usize,
    /// Seed for random scenario generation when a run does not supply one.
    pub seed:                u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            scenario_timeout_ms: 60_000,
            concurrency:         4,
            seed:                42,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.planner.max_steps == 0 {
            return Err(EngineError::Config("planner.max_steps must be at least 1".into()));
        }
        if self.planner.min_steps > self.planner.max_steps {
            return Err(EngineError::Config("planner.min_steps must be <= planner.max_steps".into()));
        }
        if self.reasoning.timeout_ms == 0 || self.execution.tool_timeout_ms == 0 {
            return Err(EngineError::Config("timeouts must be non-zero".into()));
        }
        if self.execution.backoff_max_ms < self.execution.backoff_base_ms {
            return Err(EngineError::Config("backoff_max_ms must be >= backoff_base_ms".into()));
        }
        if self.harness.concurrency == 0 {
            return Err(EngineError::Config("harness.concurrency must be at least 1".into()));
        }
        Ok(())
    }
}
