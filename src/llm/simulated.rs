use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ReasoningError;
use crate::llm::{ReasoningClient, ReasoningRequest, ResponseShape};
use crate::prompts::{self, field};

/// Deterministic stand-in for a model service.
///
/// Reads the `KEY: value` fields of the engine's prompts and answers with
/// well-formed JSON: keyword-driven plans, status-driven verdicts and a
/// canned analysis for reasoning steps. Identical prompts always yield
/// identical answers, which is what makes harness runs reproducible.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAnalyst;

impl SimulatedAnalyst {
    pub fn new() -> Self {
        Self
    }

    fn mentions(text: &str, words: &[&str]) -> bool {
        let lower = text.to_lowercase();
        words.iter().any(|w| lower.contains(w))
    }

    fn plan(prompt: &str) -> Value {
        let entity = field(prompt, prompts::ENTITY).unwrap_or("unknown");
        let task = field(prompt, prompts::TASK).unwrap_or("");
        let task_id = field(prompt, prompts::TASK_ID).unwrap_or("");
        let available: Vec<&str> = field(prompt, prompts::TOOLS)
            .map(|t| t.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        let has = |tool: &str| available.contains(&tool);

        let mut steps = Vec::new();

        if has("entity_lookup") {
            push_step(&mut steps, Some("entity_lookup"), format!("Load the profile of {}", entity), json!({ "entity": entity }));
        }
        if has("task_lookup") && Self::mentions(task, &["task", "filing", "deadline", "renewal", "overdue"]) {
            push_step(&mut steps, Some("task_lookup"), "Load the task record".into(), json!({ "task_id": task_id }));
        }
        if has("calendar") && Self::mentions(task, &["deadline", "due", "overdue", "renewal"]) {
            push_step(&mut steps, Some("calendar"), "Compute time remaining until the due date".into(), json!({}));
        }
        if has("data_fetch") && Self::mentions(task, &["records", "data", "history", "audit", "screening"]) {
            push_step(&mut steps, Some("data_fetch"), "Fetch supporting records".into(), json!({ "resource": format!("{}:records", entity) }));
        }
        let min_steps = field(prompt, prompts::MIN_STEPS).and_then(|v| v.parse::<usize>().ok()).unwrap_or(3);
        while steps.len() + 1 < min_steps {
            push_step(&mut steps, None, "Review the entity profile against the task".into(), json!({}));
        }
        push_step(&mut steps, None, "Synthesize findings into a decision".into(), json!({}));

        json!({
            "rationale": format!("Gather facts about {} before deciding on: {}", entity, task),
            "steps": steps,
        })
    }

    fn verdict(prompt: &str) -> Value {
        let status = field(prompt, prompts::STATUS).unwrap_or("failure");
        let failure = field(prompt, prompts::FAILURE).unwrap_or("none");
        let kind = failure.split_whitespace().next().unwrap_or("none");
        let transient = matches!(kind, "timeout" | "network_error" | "service_unavailable" | "rate_limited");

        let (verdict, confidence, rationale) = match status {
            "success" => ("continue", 0.9, "Step produced the expected output.".to_string()),
            "partial" => ("continue", 0.6, "Output is degraded but usable.".to_string()),
            _ if transient => ("retry", 0.5, format!("Transient failure ({}), worth another attempt.", kind)),
            _ => ("escalate", 0.2, format!("Failure ({}) needs human review.", kind)),
        };
        json!({ "verdict": verdict, "confidence": confidence, "rationale": rationale })
    }

    fn analysis(prompt: &str) -> Value {
        let entity = field(prompt, prompts::ENTITY).unwrap_or("unknown");
        let step = field(prompt, prompts::STEP).unwrap_or("step");
        let flags = field(prompt, prompts::HISTORY_FLAGS).unwrap_or("none");
        let findings: Vec<String> = if flags == "none" {
            vec![format!("No adverse history recorded for {}", entity)]
        } else {
            flags.split(", ").map(|f| format!("History flag present: {}", f)).collect()
        };
        json!({
            "summary": format!("{} completed for {}", step, entity),
            "findings": findings,
            "recommendation": if flags == "none" { "proceed" } else { "proceed_with_monitoring" },
        })
    }
}

/// Appends a step chained onto the previous one.
fn push_step(steps: &mut Vec<Value>, tool: Option<&str>, description: String, input: Value) {
    let id = format!("s{}", steps.len() + 1);
    let depends_on = if steps.is_empty() { Value::Null } else { json!(format!("s{}", steps.len())) };
    steps.push(json!({
        "id": id,
        "description": description,
        "tool": tool,
        "depends_on": depends_on,
        "input": input,
    }));
}

#[async_trait]
impl ReasoningClient for SimulatedAnalyst {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError> {
        let body = match request.shape {
            ResponseShape::Plan         => Self::plan(&request.prompt),
            ResponseShape::Verdict      => Self::verdict(&request.prompt),
            ResponseShape::StepAnalysis => Self::analysis(&request.prompt),
        };
        Ok(body.to_string())
    }

    fn name(&self) -> &str {
        "simulated-analyst"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_for(task: &str) -> Value {
        let prompt = format!(
            "ENTITY: Acme\nTASK_ID: T-1\nTASK: {}\nTOOLS: entity_lookup, task_lookup, calendar, data_fetch\n",
            task
        );
        SimulatedAnalyst::plan(&prompt)
    }

    #[test]
    fn plans_pick_tools_from_task_keywords() {
        let plan = plan_for("Check the filing deadline and audit records");
        let tools: Vec<_> = plan["steps"].as_array().unwrap().iter()
            .filter_map(|s| s["tool"].as_str().map(str::to_string))
            .collect();
        assert_eq!(tools, vec!["entity_lookup", "task_lookup", "calendar", "data_fetch"]);
    }

    #[test]
    fn short_plans_are_padded_to_three_steps() {
        let plan = plan_for("Confirm registration details");
        assert_eq!(plan["steps"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn padding_follows_the_requested_minimum() {
        let prompt = "ENTITY: Acme\nTASK: Confirm details\nTOOLS: entity_lookup\nMIN_STEPS: 5\n";
        assert_eq!(SimulatedAnalyst::plan(prompt)["steps"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn each_step_depends_on_the_one_before() {
        let plan = plan_for("Confirm registration details");
        let steps = plan["steps"].as_array().unwrap();
        assert_eq!(steps[0]["id"], "s1");
        assert!(steps[0]["depends_on"].is_null());
        assert_eq!(steps[1]["depends_on"], "s1");
        assert_eq!(steps[2]["id"], "s3");
        assert_eq!(steps[2]["depends_on"], "s2");
        assert!(steps[2]["tool"].is_null());
    }

    #[test]
    fn verdict_tracks_status_and_failure_kind() {
        let v = SimulatedAnalyst::verdict("STATUS: failure\nFAILURE: timeout (slow)\n");
        assert_eq!(v["verdict"], "retry");
        let v = SimulatedAnalyst::verdict("STATUS: failure\nFAILURE: permission_error (denied)\n");
        assert_eq!(v["verdict"], "escalate");
        let v = SimulatedAnalyst::verdict("STATUS: success\nFAILURE: none\n");
        assert_eq!(v["verdict"], "continue");
    }
}
