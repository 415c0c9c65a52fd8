//! Fault injection around tool invocations.
//!
//! `FailureInjector` decorates any `ToolInvoker`. For each call that
//! targets the configured tool it draws from a seeded RNG and, on a hit,
//! returns a synthetic failure without reaching the real tool. Reasoning
//! calls are never touched.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{EngineError, FailureKind, ToolError};
use crate::tools::{ToolInvoker, ToolOutput, ToolSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Timeout,
    InvalidInput,
    DegradedOutput,
    MissingResult,
    NetworkError,
    PermissionError,
}

impl FailureType {
    pub const ALL: [FailureType; 6] = [
        Self::Timeout,
        Self::InvalidInput,
        Self::DegradedOutput,
        Self::MissingResult,
        Self::NetworkError,
        Self::PermissionError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout         => "timeout",
            Self::InvalidInput    => "invalid_input",
            Self::DegradedOutput  => "degraded_output",
            Self::MissingResult   => "missing_result",
            Self::NetworkError    => "network_error",
            Self::PermissionError => "permission_error",
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout         => FailureKind::Timeout,
            Self::InvalidInput    => FailureKind::InvalidInput,
            Self::DegradedOutput  => FailureKind::DegradedOutput,
            Self::MissingResult   => FailureKind::MissingResult,
            Self::NetworkError    => FailureKind::NetworkError,
            Self::PermissionError => FailureKind::PermissionError,
        }
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureType {
    type Err = EngineError;

    /// Accepts `network_error` and `network-error` alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL.into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| EngineError::Config(format!("unknown failure type '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionConfig {
    pub failure:              FailureType,
    /// Probability in [0, 1] that a targeted call is replaced.
    pub rate:                 f64,
    /// Only this tool is targeted; `None` targets every tool.
    #[serde(default)]
    pub target_tool:          Option<String>,
    #[serde(default)]
    pub seed:                 u64,
    /// Delay before an injected timeout is reported.
    #[serde(default)]
    pub simulated_latency_ms: u64,
}

impl InjectionConfig {
    pub fn new(failure: FailureType, rate: f64) -> Self {
        Self { failure, rate, target_tool: None, seed: 0, simulated_latency_ms: 0 }
    }

    pub fn targeting(mut self, tool: impl Into<String>) -> Self {
        self.target_tool = Some(tool.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.simulated_latency_ms = latency_ms;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.rate.is_finite() || !(0.0..=1.0).contains(&self.rate) {
            return Err(EngineError::Config(format!("injection rate must be within [0, 1], got {}", self.rate)));
        }
        Ok(())
    }
}

/// One injected fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEvent {
    /// 1-based position of the call among all calls seen by the injector.
    pub sequence: u64,
    pub tool:     String,
    pub failure:  FailureType,
    pub at:       DateTime<Utc>,
}

pub struct FailureInjector {
    inner:    Arc<dyn ToolInvoker>,
    config:   InjectionConfig,
    rng:      Mutex<StdRng>,
    sequence: AtomicU64,
    events:   Mutex<Vec<FailureEvent>>,
}

impl FailureInjector {
    pub fn new(inner: Arc<dyn ToolInvoker>, config: InjectionConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            inner,
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            config,
            sequence: AtomicU64::new(0),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &InjectionConfig {
        &self.config
    }

    pub fn events(&self) -> Vec<FailureEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Calls seen so far, injected or not.
    pub fn invocations(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn targets(&self, tool: &str) -> bool {
        self.config.target_tool.as_deref().map_or(true, |t| t == tool)
    }

    fn should_inject(&self) -> bool {
        if self.config.rate >= 1.0 {
            return true;
        }
        if self.config.rate <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen::<f64>() < self.config.rate
    }

    async fn inject(&self, tool: &str, sequence: u64) -> Result<ToolOutput, ToolError> {
        let failure = self.config.failure;
        tracing::warn!(tool, sequence, failure = %failure, "injecting failure");
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(FailureEvent {
            sequence,
            tool: tool.to_string(),
            failure,
            at: Utc::now(),
        });

        let latency = Duration::from_millis(self.config.simulated_latency_ms);
        let message = format!("injected {} on call {}", failure, sequence);
        match failure {
            FailureType::Timeout => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                Err(ToolError::Timeout { tool: tool.to_string(), after: latency })
            }
            FailureType::InvalidInput    => Err(ToolError::InvalidInput(message)),
            FailureType::MissingResult   => Err(ToolError::MissingResult(message)),
            FailureType::NetworkError    => Err(ToolError::NetworkError(message)),
            FailureType::PermissionError => Err(ToolError::PermissionError(message)),
            FailureType::DegradedOutput  => Ok(ToolOutput {
                tool:     tool.to_string(),
                payload:  json!({ "injected": true, "note": message, "data": Value::Null }),
                success:  true,
                degraded: true,
                elapsed:  latency,
            }),
        }
    }
}

#[async_trait]
impl ToolInvoker for FailureInjector {
    async fn invoke(&self, name: &str, input: Value) -> Result<ToolOutput, ToolError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        if self.targets(name) && self.should_inject() {
            return self.inject(name, sequence).await;
        }
        self.inner.invoke(name, input).await
    }

    fn has(&self, name: &str) -> bool {
        self.inner.has(name)
    }

    fn tool_names(&self) -> Vec<String> {
        self.inner.tool_names()
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        self.inner.schemas()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FnTool, ToolRegistry};

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new("a", "", |_| Ok(json!({ "tool": "a" })))));
        registry.register(Arc::new(FnTool::new("b", "", |_| Ok(json!({ "tool": "b" })))));
        Arc::new(registry)
    }

    #[test]
    fn failure_types_parse_with_either_separator() {
        assert_eq!("network-error".parse::<FailureType>().unwrap(), FailureType::NetworkError);
        assert_eq!("permission_error".parse::<FailureType>().unwrap(), FailureType::PermissionError);
        assert!("gremlins".parse::<FailureType>().is_err());
    }

    #[test]
    fn schemas_come_from_the_wrapped_registry() {
        let injector = FailureInjector::new(registry(), InjectionConfig::new(FailureType::Timeout, 0.0)).unwrap();
        let schemas = injector.schemas();
        assert_eq!(schemas.len(), 2);
        assert!(schemas.iter().all(|s| s.input_schema.is_object()));
    }

    #[test]
    fn rate_outside_unit_interval_is_rejected() {
        assert!(FailureInjector::new(registry(), InjectionConfig::new(FailureType::Timeout, 1.5)).is_err());
        assert!(FailureInjector::new(registry(), InjectionConfig::new(FailureType::Timeout, f64::NAN)).is_err());
    }

    #[tokio::test]
    async fn full_rate_replaces_every_targeted_call() {
        let registry = registry();
        let injector = FailureInjector::new(
            registry.clone(),
            InjectionConfig::new(FailureType::NetworkError, 1.0).targeting("a"),
        ).unwrap();
        for _ in 0..5 {
            let err = injector.invoke("a", json!({})).await.unwrap_err();
            assert_eq!(err.kind(), FailureKind::NetworkError);
        }
        assert!(injector.invoke("b", json!({})).await.is_ok());
        assert_eq!(injector.events().len(), 5);
        assert_eq!(registry.metrics("a").unwrap().invocations, 0);
        assert_eq!(injector.invocations(), 6);
    }

    #[tokio::test]
    async fn zero_rate_never_injects() {
        let injector = FailureInjector::new(registry(), InjectionConfig::new(FailureType::Timeout, 0.0)).unwrap();
        for _ in 0..20 {
            assert!(injector.invoke("a", json!({})).await.is_ok());
        }
        assert!(injector.events().is_empty());
    }

    #[tokio::test]
    async fn same_seed_injects_the_same_calls() {
        async fn injected_sequences(seed: u64) -> Vec<u64> {
            let config = InjectionConfig::new(FailureType::MissingResult, 0.5).with_seed(seed);
            let injector = FailureInjector::new(registry(), config).unwrap();
            for _ in 0..50 {
                let _ = injector.invoke("a", json!({})).await;
            }
            injector.events().into_iter().map(|e| e.sequence).collect()
        }
        let first = injected_sequences(7).await;
        assert_eq!(first, injected_sequences(7).await);
        assert!(!first.is_empty() && first.len() < 50);
    }

    #[tokio::test]
    async fn degraded_output_is_a_partial_success() {
        let injector = FailureInjector::new(registry(), InjectionConfig::new(FailureType::DegradedOutput, 1.0)).unwrap();
        let out = injector.invoke("a", json!({})).await.unwrap();
        assert!(out.degraded);
        assert_eq!(out.payload["injected"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn injected_timeout_waits_for_simulated_latency() {
        let config = InjectionConfig::new(FailureType::Timeout, 1.0).with_latency(2_000);
        let injector = FailureInjector::new(registry(), config).unwrap();
        let started = tokio::time::Instant::now();
        let err = injector.invoke("a", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(2_000));
    }
}
