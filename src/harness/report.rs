use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::harness::scenarios::{Complexity, Scenario, SCENARIO_SET_VERSION};
use crate::types::{Decision, ExecutionRecord, StepStatus, Verdict};

/// What happened to one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id:       String,
    pub complexity:        Complexity,
    pub entity:            String,
    /// `None` when the scenario never produced a record (planning error, timeout).
    pub decision:          Option<Decision>,
    pub success:           bool,
    pub matched_expected:  bool,
    pub timed_out:         bool,
    pub execution_ms:      u64,
    pub plan_len:          usize,
    pub reflection_passes: usize,
    pub retries:           usize,
    pub confidence:        f64,
    pub tools_used:        BTreeSet<String>,
    pub expected_tools:    BTreeSet<String>,
    /// Failure kind of each failed attempt, or the planning/engine error class.
    pub errors:            Vec<String>,
    /// Retry and escalate verdicts issued.
    pub corrective_verdicts: usize,
    /// Of those, the ones later borne out.
    pub vindicated_verdicts: usize,
}

impl ScenarioResult {
    pub fn from_record(scenario: &Scenario, record: &ExecutionRecord, execution_ms: u64) -> Self {
        let (corrective, vindicated) = correction_counts(record);
        Self {
            scenario_id:         scenario.id.clone(),
            complexity:          scenario.complexity,
            entity:              scenario.entity.name.clone(),
            decision:            Some(record.decision),
            success:             record.decision == Decision::AutonomousComplete,
            matched_expected:    record.decision == scenario.expected_decision,
            timed_out:           false,
            execution_ms,
            plan_len:            record.plan.len(),
            reflection_passes:   record.reflection_passes(),
            retries:             record.retries(),
            confidence:          record.confidence,
            tools_used:          record.tools_used(),
            expected_tools:      scenario.expected_tools.clone(),
            errors:              record.results.iter().filter_map(|r| r.failure.map(|k| k.to_string())).collect(),
            corrective_verdicts: corrective,
            vindicated_verdicts: vindicated,
        }
    }

    fn without_record(scenario: &Scenario, execution_ms: u64, timed_out: bool, error: String) -> Self {
        Self {
            scenario_id:         scenario.id.clone(),
            complexity:          scenario.complexity,
            entity:              scenario.entity.name.clone(),
            decision:            None,
            success:             false,
            matched_expected:    false,
            timed_out,
            execution_ms,
            plan_len:            0,
            reflection_passes:   0,
            retries:             0,
            confidence:          0.0,
            tools_used:          BTreeSet::new(),
            expected_tools:      scenario.expected_tools.clone(),
            errors:              vec![error],
            corrective_verdicts: 0,
            vindicated_verdicts: 0,
        }
    }

    pub fn errored(scenario: &Scenario, error_class: impl Into<String>, execution_ms: u64) -> Self {
        Self::without_record(scenario, execution_ms, false, error_class.into())
    }

    pub fn timed_out(scenario: &Scenario, execution_ms: u64) -> Self {
        Self::without_record(scenario, execution_ms, true, "scenario_timeout".to_string())
    }

    pub fn tool_precision(&self) -> f64 {
        if self.tools_used.is_empty() {
            return if self.expected_tools.is_empty() { 1.0 } else { 0.0 };
        }
        ratio(self.tools_used.intersection(&self.expected_tools).count(), self.tools_used.len())
    }

    pub fn tool_recall(&self) -> f64 {
        if self.expected_tools.is_empty() {
            return 1.0;
        }
        ratio(self.tools_used.intersection(&self.expected_tools).count(), self.expected_tools.len())
    }

    pub fn reasoning_depth(&self) -> f64 {
        ratio(self.reflection_passes, self.plan_len)
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Counts retry/escalate verdicts and how many were borne out.
///
/// A retry is borne out when a later attempt of the same step produced
/// output. An escalation is borne out when the attempt it judged failed
/// with a non-transient kind.
pub fn correction_counts(record: &ExecutionRecord) -> (usize, usize) {
    let mut corrective = 0;
    let mut vindicated = 0;
    for reflection in &record.reflections {
        let judged = record.results.iter()
            .find(|r| r.step_id == reflection.step_id && r.attempt == reflection.attempt);
        match reflection.verdict {
            Verdict::Retry => {
                corrective += 1;
                let recovered = record.results.iter().any(|r| {
                    r.step_id == reflection.step_id
                        && r.attempt > reflection.attempt
                        && matches!(r.status, StepStatus::Success | StepStatus::Partial)
                });
                if recovered {
                    vindicated += 1;
                }
            }
            Verdict::Escalate => {
                corrective += 1;
                let warranted = judged
                    .filter(|r| r.is_failure())
                    .and_then(|r| r.failure)
                    .is_some_and(|kind| !kind.is_transient());
                if warranted {
                    vindicated += 1;
                }
            }
            Verdict::Continue | Verdict::Abort => {}
        }
    }
    (corrective, vindicated)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub scenario_set_version: String,
    pub total:                usize,
    pub succeeded:            usize,
    pub timed_out:            usize,
    pub success_rate:         f64,
    pub avg_execution_ms:     f64,
    pub avg_reflections:      f64,
    /// Tool name → number of scenarios that used it.
    pub tool_usage:           BTreeMap<String, usize>,
    /// Failure kind (or error class) → occurrences.
    pub failure_kinds:        BTreeMap<String, usize>,
    pub results:              Vec<ScenarioResult>,
}

impl SuiteReport {
    pub fn from_results(results: Vec<ScenarioResult>) -> Self {
        let mut tool_usage = BTreeMap::new();
        let mut failure_kinds = BTreeMap::new();
        for r in &results {
            for tool in &r.tools_used {
                *tool_usage.entry(tool.clone()).or_insert(0) += 1;
            }
            for err in &r.errors {
                *failure_kinds.entry(err.clone()).or_insert(0) += 1;
            }
        }
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            scenario_set_version: SCENARIO_SET_VERSION.to_string(),
            total:                results.len(),
            succeeded,
            timed_out:            results.iter().filter(|r| r.timed_out).count(),
            success_rate:         ratio(succeeded, results.len()),
            avg_execution_ms:     mean(results.iter().map(|r| r.execution_ms as f64)),
            avg_reflections:      mean(results.iter().map(|r| r.reflection_passes as f64)),
            tool_usage,
            failure_kinds,
            results,
        }
    }
}

/// The four benchmark scores over a group of scenario results.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Scores {
    pub samples:               usize,
    pub success_rate:          f64,
    pub reasoning_depth:       f64,
    pub tool_precision:        f64,
    pub tool_recall:           f64,
    /// Share of retry/escalate verdicts that were borne out; 1.0 when none were issued.
    pub reflection_correction: f64,
}

impl Scores {
    pub fn over<'a>(results: impl IntoIterator<Item = &'a ScenarioResult>) -> Self {
        let results: Vec<&ScenarioResult> = results.into_iter().collect();
        let corrective: usize = results.iter().map(|r| r.corrective_verdicts).sum();
        let vindicated: usize = results.iter().map(|r| r.vindicated_verdicts).sum();
        Self {
            samples:               results.len(),
            success_rate:          ratio(results.iter().filter(|r| r.success).count(), results.len()),
            reasoning_depth:       mean(results.iter().map(|r| r.reasoning_depth())),
            tool_precision:        mean(results.iter().map(|r| r.tool_precision())),
            tool_recall:           mean(results.iter().map(|r| r.tool_recall())),
            reflection_correction: if corrective == 0 { 1.0 } else { ratio(vindicated, corrective) },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub iterations:    usize,
    pub overall:       Scores,
    pub by_complexity: BTreeMap<Complexity, Scores>,
    pub suite:         SuiteReport,
}

impl BenchmarkReport {
    pub fn from_suite(suite: SuiteReport, iterations: usize) -> Self {
        let mut by_complexity = BTreeMap::new();
        for complexity in [Complexity::Low, Complexity::Medium, Complexity::High] {
            let group: Vec<&ScenarioResult> = suite.results.iter().filter(|r| r.complexity == complexity).collect();
            if !group.is_empty() {
                by_complexity.insert(complexity, Scores::over(group));
            }
        }
        Self {
            iterations,
            overall: Scores::over(&suite.results),
            by_complexity,
            suite,
        }
    }
}
