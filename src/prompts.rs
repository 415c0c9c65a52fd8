//! Prompt templates.
//!
//! Prompts are line-oriented: a short instruction followed by `KEY: value`
//! lines. The keys are stable so that deterministic clients (and humans
//! reading logs) can pick fields out of a prompt without parsing prose.

use serde_json::Value;

use crate::tools::ToolSchema;
use crate::types::{EntityContext, Step, StepResult, StepStatus, TaskContext};

pub const ENTITY: &str        = "ENTITY";
pub const CATEGORY: &str      = "CATEGORY";
pub const JURISDICTION: &str  = "JURISDICTION";
pub const HISTORY_FLAGS: &str = "HISTORY_FLAGS";
pub const TASK_ID: &str       = "TASK_ID";
pub const TASK: &str          = "TASK";
pub const DUE_DATE: &str      = "DUE_DATE";
pub const TOOLS: &str         = "TOOLS";
pub const MIN_STEPS: &str     = "MIN_STEPS";
pub const MAX_STEPS: &str     = "MAX_STEPS";
pub const PRIOR_RUNS: &str    = "PRIOR_RUNS";
pub const STEP: &str          = "STEP";
pub const TOOL: &str          = "TOOL";
pub const ATTEMPT: &str       = "ATTEMPT";
pub const RETRIES_LEFT: &str  = "RETRIES_LEFT";
pub const STATUS: &str        = "STATUS";
pub const FAILURE: &str       = "FAILURE";
pub const PRIOR: &str         = "PRIOR";
pub const PAYLOAD: &str       = "PAYLOAD";

const PAYLOAD_PREVIEW_CHARS: usize = 600;

/// Returns the value of the first `KEY: value` line in `prompt`.
pub fn field<'a>(prompt: &'a str, key: &str) -> Option<&'a str> {
    prompt.lines().find_map(|line| {
        line.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix(": "))
            .map(str::trim)
    })
}

fn context_lines(entity: &EntityContext, task: &TaskContext) -> String {
    let flags = if entity.history_flags.is_empty() {
        "none".to_string()
    } else {
        entity.history_flags.join(", ")
    };
    let due = task.due_date.map(|d| d.to_string()).unwrap_or_else(|| "none".to_string());
    format!(
        "{ENTITY}: {}\n{CATEGORY}: {}\n{JURISDICTION}: {}\n{HISTORY_FLAGS}: {}\n{TASK_ID}: {}\n{TASK}: {}\n{DUE_DATE}: {}\n",
        entity.name, entity.category, entity.jurisdiction, flags, task.id, task.description, due
    )
}

fn preview(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > PAYLOAD_PREVIEW_CHARS {
        let cut: String = text.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
        format!("{}…", cut)
    } else {
        text
    }
}

/// Length limits and memory handed to the planner alongside the context.
#[derive(Debug, Clone, Copy)]
pub struct PlanBounds<'a> {
    pub min_steps:  usize,
    pub max_steps:  usize,
    /// Summaries of earlier runs for the same entity, newest first.
    pub prior_runs: &'a [String],
}

pub fn plan_prompt(entity: &EntityContext, task: &TaskContext, tools: &[ToolSchema], bounds: PlanBounds<'_>) -> String {
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    let prior = if bounds.prior_runs.is_empty() {
        "none".to_string()
    } else {
        bounds.prior_runs.iter().map(|s| s.replace('\n', " ")).collect::<Vec<_>>().join(" | ")
    };
    let mut prompt = format!(
        "You are planning a compliance analysis. Produce an ordered plan of {min} to {max} steps.\n\
         Each step either names exactly one tool from {TOOLS} or sets \"tool\" to null for a \
         reasoning-only step. \"depends_on\" may only name an earlier step id. Take the \
         outcome of earlier runs in {PRIOR_RUNS} into account.\n\
         {ctx}{TOOLS}: {tools}\n{MIN_STEPS}: {min}\n{MAX_STEPS}: {max}\n{PRIOR_RUNS}: {prior}\n",
        min = bounds.min_steps,
        max = bounds.max_steps,
        ctx = context_lines(entity, task),
        tools = names.join(", "),
    );
    let described: Vec<&ToolSchema> = tools.iter().filter(|t| !t.description.is_empty()).collect();
    if !described.is_empty() {
        prompt.push_str("Tool guide:\n");
        for tool in described {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        }
    }
    prompt
}

pub fn verdict_prompt(
    entity: &EntityContext, task: &TaskContext, step: &Step,
    result: &StepResult, retries_left: u32,
) -> String {
    let status = match result.status {
        StepStatus::Success => "success",
        StepStatus::Failure => "failure",
        StepStatus::Partial => "partial",
        StepStatus::Skipped => "skipped",
    };
    let failure = match (&result.failure, &result.error) {
        (Some(kind), Some(msg)) => format!("{} ({})", kind, msg),
        (Some(kind), None)      => kind.to_string(),
        _                       => "none".to_string(),
    };
    format!(
        "Reflect on the outcome of one step of a compliance analysis. Decide whether to \
         continue with the plan, retry this step, or escalate to a human reviewer, and \
         give your updated confidence in the analysis.\n\
         {ctx}{STEP}: {} - {}\n{TOOL}: {}\n{ATTEMPT}: {}\n{RETRIES_LEFT}: {}\n{STATUS}: {}\n{FAILURE}: {}\n{PAYLOAD}: {}\n",
        step.id,
        step.description,
        step.tool.as_deref().unwrap_or("none"),
        result.attempt,
        retries_left,
        status,
        failure,
        preview(&result.payload),
        ctx = context_lines(entity, task),
    )
}

pub fn step_prompt(entity: &EntityContext, task: &TaskContext, step: &Step, prior: &Value) -> String {
    format!(
        "Carry out one reasoning step of a compliance analysis using the findings gathered so far.\n\
         {ctx}{STEP}: {} - {}\n{PRIOR}: {}\n",
        step.id,
        step.description,
        preview(prior),
        ctx = context_lines(entity, task),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(name: &str, description: &str) -> ToolSchema {
        ToolSchema { name: name.into(), description: description.into(), input_schema: Value::Null }
    }

    fn bounds(prior_runs: &[String]) -> PlanBounds<'_> {
        PlanBounds { min_steps: 3, max_steps: 7, prior_runs }
    }

    #[test]
    fn fields_round_trip_through_prompts() {
        let entity = EntityContext::new("Acme Ltd", "fintech", "UK").with_flag("late_filing");
        let task = TaskContext::new("T-1", "Check the filing deadline");
        let tools = [schema("entity_lookup", ""), schema("calendar", "")];
        let prompt = plan_prompt(&entity, &task, &tools, bounds(&[]));
        assert_eq!(field(&prompt, ENTITY), Some("Acme Ltd"));
        assert_eq!(field(&prompt, HISTORY_FLAGS), Some("late_filing"));
        assert_eq!(field(&prompt, TOOLS), Some("entity_lookup, calendar"));
        assert_eq!(field(&prompt, DUE_DATE), Some("none"));
        assert_eq!(field(&prompt, MIN_STEPS), Some("3"));
        assert_eq!(field(&prompt, PRIOR_RUNS), Some("none"));
        assert_eq!(field(&prompt, "MISSING"), None);
        assert!(!prompt.contains("Tool guide"));
    }

    #[test]
    fn plan_prompt_lists_tool_descriptions_and_prior_runs() {
        let entity = EntityContext::new("Acme Ltd", "fintech", "UK");
        let task = TaskContext::new("T-1", "Check the filing deadline");
        let tools = [schema("calendar", "Days until a due date"), schema("data_fetch", "")];
        let prior = vec!["escalated last quarter".to_string(), "two\nlines".to_string()];
        let prompt = plan_prompt(&entity, &task, &tools, bounds(&prior));
        assert_eq!(field(&prompt, TOOLS), Some("calendar, data_fetch"));
        assert_eq!(field(&prompt, PRIOR_RUNS), Some("escalated last quarter | two lines"));
        assert!(prompt.contains("- calendar: Days until a due date\n"));
        assert!(!prompt.contains("- data_fetch"));
        // the PRIOR key of step prompts is not confused with PRIOR_RUNS
        assert_eq!(field(&prompt, PRIOR), None);
    }

    #[test]
    fn verdict_prompt_carries_failure_kind() {
        let entity = EntityContext::new("Acme Ltd", "fintech", "UK");
        let task = TaskContext::new("T-1", "Review");
        let step = Step::tool("s1", "Look up entity", "entity_lookup");
        let result = StepResult::failure(&step, 0, 1, crate::error::FailureKind::NetworkError, "reset", 3);
        let prompt = verdict_prompt(&entity, &task, &step, &result, 2);
        assert_eq!(field(&prompt, STATUS), Some("failure"));
        assert_eq!(field(&prompt, FAILURE), Some("network_error (reset)"));
        assert_eq!(field(&prompt, RETRIES_LEFT), Some("2"));
    }

    #[test]
    fn long_payloads_are_truncated() {
        let big = json!({ "blob": "x".repeat(2_000) });
        assert!(preview(&big).chars().count() <= PAYLOAD_PREVIEW_CHARS + 1);
    }
}
