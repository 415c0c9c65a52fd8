//! The engine facade: building, analysis entry points, audit and status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use mockall::mock;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use decisionloop::llm::{MockReasoningClient, ResponseShape};
use decisionloop::tools::ToolOutput;
use decisionloop::{
    AuditSink, Decision, Engine, EngineConfig, EngineError, EntityContext, InMemoryDirectory, MemoryKey,
    MemoryStore, PlanningError, ReflectionMode, RunSummary, SimulatedAnalyst, SqliteAuditSink, TaskContext, ToolError, ToolInvoker,
};

mock! {
    pub Sink {}

    #[async_trait]
    impl AuditSink for Sink {
        async fn persist(&self, summary: &RunSummary) -> Result<(), String>;
    }
}

mock! {
    pub Invoker {}

    #[async_trait]
    impl ToolInvoker for Invoker {
        async fn invoke(&self, name: &str, input: Value) -> Result<ToolOutput, ToolError>;
        fn has(&self, name: &str) -> bool;
        fn tool_names(&self) -> Vec<String>;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

fn acme() -> (EntityContext, TaskContext) {
    let due = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
    (
        EntityContext::new("Acme Payments Ltd", "fintech", "UK").with_flag("late_filing"),
        TaskContext::new("T-1", "Review audit records before the renewal deadline").due(due),
    )
}

fn directory() -> InMemoryDirectory {
    let (entity, task) = acme();
    InMemoryDirectory::new()
        .with_entity(entity.clone())
        .with_task(entity.name.clone(), task)
        .with_dataset(format!("{}:records", entity.name), json!({ "filings": 3 }))
}

fn builder() -> decisionloop::EngineBuilder {
    Engine::builder()
        .client(Arc::new(SimulatedAnalyst::new()))
        .directory(Arc::new(directory()))
        .calendar_as_of(NaiveDate::from_ymd_opt(2026, 3, 20).unwrap())
        .backoff_ms(1, 5)
}

// ─────────────────────────────────────────────────────────────────────────────
// Analysis
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_analysis_completes_and_is_audited() {
    let mut sink = MockSink::new();
    sink.expect_persist()
        .times(1)
        .withf(|summary| summary.entity == "Acme Payments Ltd" && summary.decision == Decision::AutonomousComplete)
        .returning(|_| Ok(()));
    let engine = builder().audit(Arc::new(sink)).build().unwrap();
    let (entity, task) = acme();

    let record = engine.run_agentic_analysis(&entity, &task).await.unwrap();

    assert_eq!(record.decision, Decision::AutonomousComplete);
    assert_eq!(record.plan.len(), 5);
    assert!(record.tools_used().contains("calendar"));
    let calendar = record.results.iter().find(|r| r.tool.as_deref() == Some("calendar")).unwrap();
    assert_eq!(calendar.payload["days_remaining"], 11);
    assert_eq!(engine.memory().len(), 1);
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_the_run() {
    let mut sink = MockSink::new();
    sink.expect_persist().times(1).returning(|_| Err("disk full".to_string()));
    let engine = builder().audit(Arc::new(sink)).build().unwrap();
    let (entity, task) = acme();

    let record = engine.run_agentic_analysis(&entity, &task).await.unwrap();

    assert_eq!(record.decision, Decision::AutonomousComplete);
}

#[tokio::test]
async fn test_audit_can_be_switched_off() {
    let mut sink = MockSink::new();
    sink.expect_persist().never();
    let mut config = EngineConfig::default();
    config.execution.audit_runs = false;
    config.execution.remember_runs = false;
    let engine = builder().config(config).audit(Arc::new(sink)).build().unwrap();
    let (entity, task) = acme();

    engine.run_agentic_analysis(&entity, &task).await.unwrap();

    assert!(engine.memory().is_empty());
    assert_eq!(engine.get_status().components["audit_sink"], false);
}

#[tokio::test]
async fn test_runs_are_persisted_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(SqliteAuditSink::new(dir.path().join("audit.db")).unwrap());
    let engine = builder().audit(sink.clone()).build().unwrap();
    let (entity, task) = acme();

    let first = engine.run_agentic_analysis(&entity, &task).await.unwrap();
    let second = engine.run_agentic_analysis(&entity, &task).await.unwrap();

    let stored = sink.list_for_entity(&entity.name).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].run_id, second.run_id);
    assert_eq!(sink.load(first.run_id).unwrap().map(|s| s.decision), Some(Decision::AutonomousComplete));

    // same entity and task share one memory entry
    let memory = engine.memory().get(&MemoryKey::derive(&entity.name, &task.description)).unwrap();
    assert_eq!(memory.revision, 2);
}

#[tokio::test]
async fn test_unparseable_plan_is_a_planning_error() {
    let client = MockReasoningClient::from_texts(vec!["no json here", "still none", "nope"]);
    let engine = Engine::builder()
        .client(Arc::new(client))
        .directory(Arc::new(directory()))
        .reflection(ReflectionMode::Deterministic)
        .build()
        .unwrap();
    let (entity, task) = acme();

    let err = engine.run_agentic_analysis(&entity, &task).await.unwrap_err();

    assert!(matches!(err, EngineError::Planning(PlanningError::Reasoning(_))), "{err}");
}

#[tokio::test]
async fn test_cancelled_analysis_is_aborted() {
    let engine = builder().build().unwrap();
    let (entity, task) = acme();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let record = engine.run_agentic_analysis_with_cancel(&entity, &task, &cancel).await.unwrap();

    assert_eq!(record.decision, Decision::Aborted);
    assert_eq!(record.results.len(), record.plan.len());
    assert!(record.tools_used().is_empty());
}

#[tokio::test]
async fn test_planner_sees_remembered_runs_and_tool_guide() {
    let client = Arc::new(MockReasoningClient::with_responder(|request| {
        let body = match request.shape {
            ResponseShape::Plan => json!({ "steps": [
                { "id": "s1", "description": "Weigh prior outcomes", "tool": null },
                { "id": "s2", "description": "Check history", "tool": null, "depends_on": "s1" },
                { "id": "s3", "description": "Decide", "tool": null, "depends_on": "s2" },
            ]}),
            ResponseShape::Verdict => json!({ "verdict": "continue", "confidence": 0.8 }),
            ResponseShape::StepAnalysis => json!({ "summary": "done" }),
        };
        Ok(body.to_string())
    }));
    let memory = Arc::new(MemoryStore::new());
    let (entity, task) = acme();
    memory.save(
        &MemoryKey::derive(&entity.name, "Quarterly screening"),
        &entity.name,
        "run 1",
        "escalated: screening records incomplete",
    );
    let engine = Engine::builder()
        .client(client.clone())
        .directory(Arc::new(directory()))
        .memory(memory)
        .build()
        .unwrap();

    let record = engine.run_agentic_analysis(&entity, &task).await.unwrap();

    assert_eq!(record.decision, Decision::AutonomousComplete);
    let plan_request = client.request(0).unwrap();
    assert_eq!(plan_request.shape, ResponseShape::Plan);
    assert!(plan_request.prompt.contains("PRIOR_RUNS: escalated: screening records incomplete"));
    assert!(plan_request.prompt.contains("- calendar: "));

    // the finished run is remembered and shows up in the next plan
    engine.run_agentic_analysis(&entity, &task).await.unwrap();
    let plans: Vec<_> = (0..client.call_count())
        .filter_map(|n| client.request(n))
        .filter(|r| r.shape == ResponseShape::Plan)
        .collect();
    assert_eq!(plans.len(), 2);
    assert!(plans[1].prompt.contains(&record.summary().headline()));
}

// ─────────────────────────────────────────────────────────────────────────────
// Tools behind the seam
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_loop_calls_tools_through_the_invoker_seam() {
    use decisionloop::config::{ExecutionConfig, ReasoningConfig};
    use decisionloop::{AgentLoop, Plan, ReasoningGateway, Reflector, Step};

    let mut invoker = MockInvoker::new();
    invoker.expect_invoke()
        .withf(|name, input| name == "entity_lookup" && input["entity"] == "Acme Payments Ltd")
        .times(1)
        .returning(|name, _| Err(ToolError::InvalidInput(format!("{} rejected input", name))));

    let gateway = Arc::new(ReasoningGateway::new(Arc::new(SimulatedAnalyst::new()), &ReasoningConfig::default()));
    let agent = AgentLoop::new(gateway, Arc::new(invoker), Arc::new(Reflector::deterministic()), ExecutionConfig::default());
    let (entity, task) = acme();

    let record = agent
        .run(Plan::new(vec![Step::tool("s1", "profile", "entity_lookup")]), &entity, &task, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.decision, Decision::Escalated);
    assert!(record.failure_reasons()[0].contains("invalid_input"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_status_reflects_configuration() {
    let engine = builder().reflection(ReflectionMode::Deterministic).build().unwrap();
    let (entity, task) = acme();
    engine.run_agentic_analysis(&entity, &task).await.unwrap();

    let status = engine.get_status();

    assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(status.reflection, ReflectionMode::Deterministic);
    assert_eq!(status.memory_entries, 1);
    assert_eq!(status.tools.len(), 4);
    assert!(status.components.values().filter(|on| **on).count() >= 6);
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["reflection"], "deterministic");
}
