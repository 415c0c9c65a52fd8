use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::config::PlannerConfig;
use crate::error::PlanningError;
use crate::gateway::ReasoningGateway;
use crate::llm::ResponseShape;
use crate::prompts::{self, PlanBounds};
use crate::tools::ToolSchema;
use crate::types::{EntityContext, Plan, Step, TaskContext};

/// Plan as returned by the model, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanDraft {
    #[serde(default)]
    pub rationale: Option<String>,
    pub steps:     Vec<StepDraft>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepDraft {
    #[serde(default)]
    pub id:           Option<String>,
    #[serde(default)]
    pub description:  String,
    #[serde(default)]
    pub tool:         Option<String>,
    #[serde(default)]
    pub depends_on:   Option<String>,
    #[serde(default)]
    pub input:        Option<Value>,
    #[serde(default)]
    pub retry_budget: Option<u32>,
}

/// Turns an entity/task context into a validated `Plan` with one reasoning call.
pub struct Planner {
    gateway:              Arc<ReasoningGateway>,
    tools:                Vec<ToolSchema>,
    min_steps:            usize,
    max_steps:            usize,
    default_retry_budget: u32,
}

impl Planner {
    pub fn new(gateway: Arc<ReasoningGateway>, tools: Vec<ToolSchema>, config: &PlannerConfig, default_retry_budget: u32) -> Self {
        Self {
            gateway,
            tools,
            min_steps: config.min_steps,
            max_steps: config.max_steps,
            default_retry_budget,
        }
    }

    pub async fn plan(&self, entity: &EntityContext, task: &TaskContext) -> Result<Plan, PlanningError> {
        self.plan_with_history(entity, task, &[]).await
    }

    /// Plans with the summaries of earlier runs for the same entity in the prompt.
    pub async fn plan_with_history(
        &self,
        entity: &EntityContext,
        task: &TaskContext,
        prior_runs: &[String],
    ) -> Result<Plan, PlanningError> {
        let bounds = PlanBounds { min_steps: self.min_steps, max_steps: self.max_steps, prior_runs };
        let prompt = prompts::plan_prompt(entity, task, &self.tools, bounds);
        let draft: PlanDraft = self.gateway.reason(&prompt, ResponseShape::Plan).await?;
        let plan = self.validate(draft)?;
        tracing::info!(
            entity = %entity.name,
            task_id = %task.id,
            steps = plan.len(),
            prior_runs = prior_runs.len(),
            "plan ready"
        );
        Ok(plan)
    }

    /// Checks a draft and converts it into a `Plan`. Never retries.
    pub fn validate(&self, draft: PlanDraft) -> Result<Plan, PlanningError> {
        let invalid = |msg: String| {
            tracing::warn!(reason = %msg, "plan rejected");
            PlanningError::InvalidPlanShape(msg)
        };

        if draft.steps.is_empty() {
            return Err(invalid("plan has no steps".into()));
        }
        if draft.steps.len() > self.max_steps {
            return Err(invalid(format!("plan has {} steps, at most {} allowed", draft.steps.len(), self.max_steps)));
        }
        if draft.steps.len() < self.min_steps {
            return Err(invalid(format!("plan has {} steps, at least {} required", draft.steps.len(), self.min_steps)));
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut steps = Vec::with_capacity(draft.steps.len());

        for (i, d) in draft.steps.into_iter().enumerate() {
            let id = d.id
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("s{}", i + 1));
            if seen.contains(&id) {
                return Err(invalid(format!("duplicate step id '{}'", id)));
            }
            if d.description.trim().is_empty() {
                return Err(invalid(format!("step '{}' has no description", id)));
            }

            let tool = d.tool
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty() && t != "none" && t != "null");
            if let Some(tool) = &tool {
                if !self.tools.iter().any(|t| t.name == *tool) {
                    return Err(invalid(format!("step '{}' uses unregistered tool '{}'", id, tool)));
                }
            }

            let depends_on = d.depends_on.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            if let Some(dep) = &depends_on {
                // Only ids already seen are earlier steps; this also rules out cycles.
                if !seen.contains(dep) {
                    return Err(invalid(format!("step '{}' depends on '{}', which is not an earlier step", id, dep)));
                }
            }

            let input = match d.input {
                None | Some(Value::Null) => Value::Object(Default::default()),
                Some(v @ Value::Object(_)) => v,
                Some(_) => return Err(invalid(format!("step '{}' input must be an object", id))),
            };

            seen.insert(id.clone());
            steps.push(Step {
                id,
                description: d.description.trim().to_string(),
                tool,
                input,
                depends_on,
                retry_budget: d.retry_budget.unwrap_or(self.default_retry_budget),
            });
        }

        let plan = Plan::new(steps);
        Ok(match draft.rationale {
            Some(r) if !r.trim().is_empty() => plan.with_rationale(r.trim()),
            _ => plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReasoningConfig;
    use crate::error::ReasoningError;
    use crate::llm::{MockReasoningClient, SimulatedAnalyst};
    use crate::types::StepKind;

    fn tools() -> Vec<ToolSchema> {
        ["entity_lookup", "task_lookup", "calendar", "data_fetch"]
            .into_iter()
            .map(|name| ToolSchema { name: name.into(), description: format!("{} tool", name), input_schema: Value::Null })
            .collect()
    }

    fn planner_with(client: Arc<dyn crate::llm::ReasoningClient>) -> Planner {
        let gateway = Arc::new(ReasoningGateway::new(client, &ReasoningConfig::default()));
        Planner::new(gateway, tools(), &PlannerConfig::default(), 2)
    }

    /// Accepts single-step drafts so shape checks can be exercised in isolation.
    fn planner() -> Planner {
        let gateway = Arc::new(ReasoningGateway::new(
            Arc::new(MockReasoningClient::new(Vec::new())),
            &ReasoningConfig::default(),
        ));
        let config = PlannerConfig { min_steps: 1, ..Default::default() };
        Planner::new(gateway, tools(), &config, 2)
    }

    fn draft(json: &str) -> PlanDraft {
        serde_json::from_str(json).unwrap()
    }

    fn rejected(json: &str) -> String {
        match planner().validate(draft(json)) {
            Err(PlanningError::InvalidPlanShape(msg)) => msg,
            other => panic!("expected InvalidPlanShape, got {:?}", other),
        }
    }

    #[test]
    fn valid_draft_becomes_plan() {
        let plan = planner().validate(draft(r#"{
            "rationale": "look then think",
            "steps": [
                {"id": "a", "description": "Look up", "tool": "entity_lookup"},
                {"id": "b", "description": "Think", "tool": null, "depends_on": "a", "retry_budget": 0}
            ]
        }"#)).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.rationale(), Some("look then think"));
        assert_eq!(plan.steps()[0].retry_budget, 2);
        assert_eq!(plan.steps()[1].retry_budget, 0);
        assert_eq!(plan.steps()[1].kind(), StepKind::ReasoningCall);
    }

    #[test]
    fn missing_ids_are_assigned_by_position() {
        let plan = planner().validate(draft(r#"{"steps": [
            {"description": "one", "tool": "calendar"},
            {"description": "two", "depends_on": "s1"}
        ]}"#)).unwrap();
        assert_eq!(plan.steps()[0].id, "s1");
        assert_eq!(plan.steps()[1].depends_on.as_deref(), Some("s1"));
    }

    #[test]
    fn rejects_empty_and_oversized_plans() {
        assert!(rejected(r#"{"steps": []}"#).contains("no steps"));
        let steps: Vec<String> = (0..8).map(|i| format!(r#"{{"description": "s{}"}}"#, i)).collect();
        assert!(rejected(&format!(r#"{{"steps": [{}]}}"#, steps.join(","))).contains("at most 7"));
    }

    #[test]
    fn rejects_plans_below_the_minimum() {
        let planner = planner_with(Arc::new(MockReasoningClient::new(Vec::new())));
        let two = draft(r#"{"steps": [{"description": "one"}, {"description": "two", "depends_on": "s1"}]}"#);
        match planner.validate(two) {
            Err(PlanningError::InvalidPlanShape(msg)) => assert!(msg.contains("at least 3"), "{msg}"),
            other => panic!("expected InvalidPlanShape, got {:?}", other),
        }
    }

    #[test]
    fn rejects_duplicates_unknown_tools_and_forward_dependencies() {
        assert!(rejected(r#"{"steps": [{"id": "a", "description": "x"}, {"id": "a", "description": "y"}]}"#)
            .contains("duplicate"));
        assert!(rejected(r#"{"steps": [{"id": "a", "description": "x", "tool": "web_search"}]}"#)
            .contains("unregistered"));
        assert!(rejected(r#"{"steps": [{"id": "a", "description": "x", "depends_on": "b"}, {"id": "b", "description": "y"}]}"#)
            .contains("not an earlier step"));
        assert!(rejected(r#"{"steps": [{"id": "a", "description": "x", "depends_on": "a"}]}"#)
            .contains("not an earlier step"));
    }

    #[tokio::test]
    async fn plans_through_the_gateway() {
        let planner = planner_with(Arc::new(SimulatedAnalyst::new()));
        let entity = EntityContext::new("Acme Ltd", "fintech", "UK");
        let task = TaskContext::new("T-1", "Check the filing deadline");
        let plan = planner.plan(&entity, &task).await.unwrap();
        assert_eq!(plan.steps()[0].tool.as_deref(), Some("entity_lookup"));
        assert!(plan.len() >= 3);
    }

    #[tokio::test]
    async fn prompt_carries_tool_guide_and_prior_runs() {
        let mock = Arc::new(MockReasoningClient::with_responder(|_| {
            Ok(r#"{"steps": [
                {"description": "a", "tool": "entity_lookup"},
                {"description": "b", "depends_on": "s1"},
                {"description": "c", "depends_on": "s2"}
            ]}"#.to_string())
        }));
        let planner = planner_with(mock.clone());
        let prior = vec!["escalated: missing filings".to_string()];

        planner.plan_with_history(
            &EntityContext::new("Acme", "fintech", "UK"),
            &TaskContext::new("T-1", "Review"),
            &prior,
        ).await.unwrap();

        let prompt = mock.request(0).unwrap().prompt;
        assert_eq!(prompts::field(&prompt, prompts::PRIOR_RUNS), Some("escalated: missing filings"));
        assert!(prompt.contains("- calendar: calendar tool"));
    }

    #[tokio::test]
    async fn gateway_failures_surface_as_reasoning_errors() {
        let mock = Arc::new(MockReasoningClient::new(vec![Err(ReasoningError::ServiceUnavailable("down".into()))]));
        let err = planner_with(mock).plan(
            &EntityContext::new("Acme", "fintech", "UK"),
            &TaskContext::new("T-1", "Review"),
        ).await.unwrap_err();
        assert!(matches!(err, PlanningError::Reasoning(ReasoningError::ServiceUnavailable(_))));
    }
}
