use serde::{Deserialize, Serialize};

use crate::harness::scenarios::Scenario;
use crate::injector::{FailureEvent, InjectionConfig};
use crate::types::{Decision, ExecutionRecord, RecoveryAttempt};

/// Injected faults of one run next to the loop's reactions to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryTimeline {
    pub scenario_id:         String,
    pub decision:            Option<Decision>,
    pub failure_events:      Vec<FailureEvent>,
    pub recoveries:          Vec<RecoveryAttempt>,
    /// Every failed step eventually produced output.
    pub fully_recovered:     bool,
    /// Longest recovery latency across the run's recovered attempts.
    pub time_to_recovery_ms: Option<u64>,
    pub error:               Option<String>,
}

impl RecoveryTimeline {
    pub fn from_record(scenario: &Scenario, record: &ExecutionRecord, failure_events: Vec<FailureEvent>) -> Self {
        let recoveries = record.recoveries.clone();
        Self {
            scenario_id:         scenario.id.clone(),
            decision:            Some(record.decision),
            fully_recovered:     recoveries.iter().all(|r| r.recovered),
            time_to_recovery_ms: recoveries.iter().filter_map(|r| r.recovery_latency_ms).max(),
            failure_events,
            recoveries,
            error:               None,
        }
    }

    pub fn failed(scenario: &Scenario, failure_events: Vec<FailureEvent>, error: impl Into<String>) -> Self {
        Self {
            scenario_id:         scenario.id.clone(),
            decision:            None,
            failure_events,
            recoveries:          Vec::new(),
            fully_recovered:     false,
            time_to_recovery_ms: None,
            error:               Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub injection:                InjectionConfig,
    pub runs:                     usize,
    pub injected_faults:          usize,
    pub recovery_attempts:        usize,
    pub recovered_attempts:       usize,
    /// recovered / attempts; 1.0 when nothing needed recovering.
    pub recovery_rate:            f64,
    pub mean_recovery_latency_ms: f64,
    pub autonomous_completions:   usize,
    pub escalations:              usize,
    pub timelines:                Vec<RecoveryTimeline>,
}

impl RecoveryReport {
    pub fn from_timelines(injection: InjectionConfig, timelines: Vec<RecoveryTimeline>) -> Self {
        let attempts: Vec<&RecoveryAttempt> = timelines.iter().flat_map(|t| t.recoveries.iter()).collect();
        let recovered: Vec<&RecoveryAttempt> = attempts.iter().copied().filter(|r| r.recovered).collect();
        let latencies: Vec<u64> = recovered.iter().filter_map(|r| r.recovery_latency_ms).collect();
        let count_decision = |d: Decision| timelines.iter().filter(|t| t.decision == Some(d)).count();

        Self {
            runs:                     timelines.len(),
            injected_faults:          timelines.iter().map(|t| t.failure_events.len()).sum(),
            recovery_attempts:        attempts.len(),
            recovered_attempts:       recovered.len(),
            recovery_rate:            if attempts.is_empty() { 1.0 } else { recovered.len() as f64 / attempts.len() as f64 },
            mean_recovery_latency_ms: if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
            },
            autonomous_completions:   count_decision(Decision::AutonomousComplete),
            escalations:              count_decision(Decision::Escalated),
            injection,
            timelines,
        }
    }
}
