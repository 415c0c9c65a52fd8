//! # Compliance Run
//!
//! Runs one autonomous analysis against an in-memory directory, then a
//! small benchmark over the harness scenarios.
//!
//! Uses the deterministic `SimulatedAnalyst` unless `ANTHROPIC_API_KEY` or
//! `OPENAI_API_KEY` is set; Anthropic wins when both are.
//!
//! # Usage
//! ```bash
//! cargo run --example compliance_run
//! RUST_LOG=debug OPENAI_API_KEY=sk-... cargo run --example compliance_run
//! ANTHROPIC_API_KEY=sk-ant-... cargo run --example compliance_run
//! ```

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;

use decisionloop::llm::ReasoningClient;
use decisionloop::telemetry::init_tracing;
use decisionloop::{
    BenchmarkConfig, Engine, EntityContext, InMemoryDirectory, MemoryAuditSink, SimulatedAnalyst, TaskContext,
};

#[cfg(feature = "anthropic")]
fn anthropic_client() -> Option<Arc<dyn ReasoningClient>> {
    let client = decisionloop::llm::AnthropicClient::from_env("claude-3-5-haiku-latest").ok()?;
    println!("Using: AnthropicClient (claude-3-5-haiku-latest)\n");
    Some(Arc::new(client))
}

#[cfg(not(feature = "anthropic"))]
fn anthropic_client() -> Option<Arc<dyn ReasoningClient>> {
    None
}

#[cfg(feature = "openai")]
fn openai_client() -> Option<Arc<dyn ReasoningClient>> {
    std::env::var("OPENAI_API_KEY").ok()?;
    println!("Using: OpenAiClient (gpt-4o-mini)\n");
    Some(Arc::new(decisionloop::llm::OpenAiClient::new("gpt-4o-mini")))
}

#[cfg(not(feature = "openai"))]
fn openai_client() -> Option<Arc<dyn ReasoningClient>> {
    None
}

fn reasoning_client() -> Arc<dyn ReasoningClient> {
    anthropic_client().or_else(openai_client).unwrap_or_else(|| {
        println!("Using: SimulatedAnalyst (offline, deterministic)\n");
        Arc::new(SimulatedAnalyst::new())
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    println!("=== decisionloop-rs Compliance Run ===\n");

    let entity = EntityContext::new("Acme Payments Ltd", "fintech", "UK").with_flag("late_filing");
    let due = NaiveDate::from_ymd_opt(2026, 11, 30).ok_or_else(|| anyhow::anyhow!("invalid due date"))?;
    let task = TaskContext::new("T-2041", "Review audit records before the licence renewal deadline").due(due);

    let directory = InMemoryDirectory::new()
        .with_entity(entity.clone())
        .with_task(entity.name.clone(), task.clone())
        .with_dataset(
            format!("{}:records", entity.name),
            json!({ "filings": 14, "late": 1, "last_audit": "2025-09-12" }),
        );

    let audit = Arc::new(MemoryAuditSink::new());
    let engine = Engine::builder()
        .client(reasoning_client())
        .directory(Arc::new(directory))
        .audit(audit.clone())
        .backoff_ms(50, 500)
        .build()?;

    let record = engine.run_agentic_analysis(&entity, &task).await?;

    println!("Decision   : {}", record.decision);
    println!("Confidence : {:.2}", record.confidence);
    println!("Tools used : {:?}", record.tools_used());
    println!("Attempts   : {} ({} retries)", record.results.len(), record.retries());
    println!("\n{}", record.trace.render_table());
    println!("Audited runs: {}", audit.len());

    let benchmark = engine.run_benchmarks(&BenchmarkConfig { random_scenarios: 6, ..Default::default() }).await;
    match benchmark.results {
        Some(report) => {
            println!("\n=== Benchmark ({} scenarios) ===", report.suite.total);
            println!("{}", serde_json::to_string_pretty(&report.overall)?);
        }
        None => println!("\nBenchmark {:?}: {}", benchmark.status, benchmark.error.unwrap_or_default()),
    }

    println!("\n{}", serde_json::to_string_pretty(&engine.get_status())?);
    Ok(())
}
