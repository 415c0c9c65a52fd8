use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::Event;
use crate::types::LoopState;

/// Flat classification attached to every failed or degraded `StepResult`.
///
/// Every error in the taxonomy below maps onto exactly one kind, which is
/// what reflection, retry policy and the harness reports work with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ServiceUnavailable,
    MalformedOutput,
    RateLimited,
    UnknownTool,
    InvalidInput,
    PermissionError,
    NetworkError,
    DegradedOutput,
    MissingResult,
    UnhandledError,
}

impl FailureKind {
    /// Transient kinds are the only ones the loop will ever retry.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::NetworkError | Self::ServiceUnavailable | Self::RateLimited
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout            => "timeout",
            Self::ServiceUnavailable => "service_unavailable",
            Self::MalformedOutput    => "malformed_output",
            Self::RateLimited        => "rate_limited",
            Self::UnknownTool        => "unknown_tool",
            Self::InvalidInput       => "invalid_input",
            Self::PermissionError    => "permission_error",
            Self::NetworkError       => "network_error",
            Self::DegradedOutput     => "degraded_output",
            Self::MissingResult      => "missing_result",
            Self::UnhandledError     => "unhandled_error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures surfaced by the reasoning gateway and model clients.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReasoningError {
    #[error("reasoning call timed out after {0:?}")]
    Timeout(Duration),

    #[error("reasoning service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("malformed output after {attempts} attempt(s): {reason}")]
    MalformedOutput { attempts: u32, reason: String },

    #[error("reasoning service rate limited: {0}")]
    RateLimited(String),
}

impl ReasoningError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_)             => FailureKind::Timeout,
            Self::ServiceUnavailable(_)  => FailureKind::ServiceUnavailable,
            Self::MalformedOutput { .. } => FailureKind::MalformedOutput,
            Self::RateLimited(_)         => FailureKind::RateLimited,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// Failures surfaced by tool invocations (real or injected).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("tool '{0}' not found in registry")]
    UnknownTool(String),

    #[error("tool '{tool}' timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("permission denied: {0}")]
    PermissionError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("degraded output: {0}")]
    DegradedOutput(String),

    #[error("no result: {0}")]
    MissingResult(String),
}

impl ToolError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnknownTool(_)     => FailureKind::UnknownTool,
            Self::Timeout { .. }     => FailureKind::Timeout,
            Self::InvalidInput(_)    => FailureKind::InvalidInput,
            Self::PermissionError(_) => FailureKind::PermissionError,
            Self::NetworkError(_)    => FailureKind::NetworkError,
            Self::DegradedOutput(_)  => FailureKind::DegradedOutput,
            Self::MissingResult(_)   => FailureKind::MissingResult,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PlanningError {
    #[error("invalid plan shape: {0}")]
    InvalidPlanShape(String),

    #[error("planning call failed: {0}")]
    Reasoning(#[from] ReasoningError),
}

#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("unhandled error while executing step '{step}': {message}")]
    UnhandledError { step: String, message: String },
}

/// Errors returned by the engine's public entry points.
///
/// Tool and reasoning faults never show up here: they are folded into the
/// `ExecutionRecord` as failed step results.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("invalid transition: {from} + {event} is not a legal move")]
    InvalidTransition { from: LoopState, event: Event },

    #[error("build error: {0}")]
    Build(String),

    #[error("config error: {0}")]
    Config(String),
}
