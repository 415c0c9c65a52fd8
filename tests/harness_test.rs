//! Harness runs through the engine facade, offline and reproducible.

use std::sync::Arc;

use decisionloop::harness::{Complexity, ComplexityMix, SCENARIO_SET_VERSION};
use decisionloop::llm::MockReasoningClient;
use decisionloop::{
    BenchmarkConfig, Decision, Engine, EnvelopeStatus, FailureType, InMemoryDirectory, InjectionConfig,
    RecoveryConfig, SimulatedAnalyst, SuiteConfig,
};

fn engine() -> Engine {
    Engine::builder()
        .client(Arc::new(SimulatedAnalyst::new()))
        .directory(Arc::new(InMemoryDirectory::new()))
        .backoff_ms(1, 5)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_deterministic_suite_matches_expectations() {
    let envelope = engine().run_test_suite(&SuiteConfig::default()).await;

    assert_eq!(envelope.status, EnvelopeStatus::Completed);
    let report = envelope.results.unwrap();
    assert_eq!(report.scenario_set_version, SCENARIO_SET_VERSION);
    assert_eq!(report.total, 6);
    assert_eq!(report.succeeded, 5);
    assert!((report.success_rate - 5.0 / 6.0).abs() < 1e-9);
    assert!(report.results.iter().all(|r| r.matched_expected), "{:#?}", report.results);

    // results keep scenario order regardless of concurrency
    let ids: Vec<_> = report.results.iter().map(|r| r.scenario_id.as_str()).collect();
    assert_eq!(ids, ["det-01", "det-02", "det-03", "det-04", "det-05", "det-06"]);

    let kestrel = &report.results[5];
    assert_eq!(kestrel.decision, Some(Decision::Escalated));
    assert_eq!(kestrel.errors, vec!["missing_result".to_string()]);
    assert_eq!(report.failure_kinds.get("missing_result"), Some(&1));
}

#[tokio::test]
async fn test_suite_is_reproducible() {
    let config = SuiteConfig { random_scenarios: 8, seed: Some(7), ..Default::default() };
    let engine = engine();

    let first = engine.run_test_suite(&config).await.results.unwrap();
    let second = engine.run_test_suite(&config).await.results.unwrap();

    assert_eq!(first.total, 14);
    assert_eq!(first.succeeded, second.succeeded);
    let decisions = |r: &decisionloop::harness::SuiteReport| r.results.iter().map(|s| s.decision).collect::<Vec<_>>();
    assert_eq!(decisions(&first), decisions(&second));
}

#[tokio::test]
async fn test_benchmark_scores_every_complexity() {
    let config = BenchmarkConfig {
        iterations:       2,
        random_scenarios: 6,
        mix:              ComplexityMix::default(),
        seed:             Some(3),
        timeout_ms:       None,
    };
    let report = engine().run_benchmarks(&config).await.results.unwrap();

    assert_eq!(report.iterations, 2);
    assert_eq!(report.overall.samples, 24);
    assert!(report.overall.tool_recall > 0.9);
    assert!(report.overall.tool_precision > 0.9);
    // det-06 stops at its fourth of five steps
    assert!(report.overall.reasoning_depth > 0.9 && report.overall.reasoning_depth < 1.0);
    for complexity in [Complexity::Low, Complexity::Medium, Complexity::High] {
        assert!(report.by_complexity.contains_key(&complexity));
    }
    // the only escalation is warranted, so every corrective verdict is borne out
    assert!((report.overall.reflection_correction - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_invalid_mix_is_reported_as_error() {
    let config = SuiteConfig {
        include_deterministic: false,
        random_scenarios:      3,
        mix:                   ComplexityMix { low: 0.0, medium: 0.0, high: 0.0 },
        ..Default::default()
    };
    let envelope = engine().run_test_suite(&config).await;

    assert_eq!(envelope.status, EnvelopeStatus::Error);
    assert!(envelope.results.is_none());
    assert!(envelope.error.unwrap().contains("complexity weights"));
}

#[tokio::test]
async fn test_slow_reasoning_times_out_the_run() {
    let slow = MockReasoningClient::with_responder(|_| Ok("{}".to_string()))
        .with_delay(std::time::Duration::from_secs(5));
    let engine = Engine::builder()
        .client(Arc::new(slow))
        .directory(Arc::new(InMemoryDirectory::new()))
        .build()
        .unwrap();

    let envelope = engine.run_test_suite(&SuiteConfig { timeout_ms: Some(50), ..Default::default() }).await;

    assert_eq!(envelope.status, EnvelopeStatus::Timeout);
    assert!(envelope.results.is_none());
}

#[tokio::test]
async fn test_recovery_simulation_recovers_from_transient_faults() {
    let injection = InjectionConfig::new(FailureType::NetworkError, 1.0)
        .targeting("calendar")
        .with_seed(11);
    let envelope = engine().run_recovery_simulation(&RecoveryConfig::new(injection)).await;

    let report = envelope.results.unwrap();
    assert_eq!(report.runs, 6);
    // det-02, det-03, det-05 and det-06 plan a calendar step
    assert_eq!(report.timelines.iter().filter(|t| !t.failure_events.is_empty()).count(), 4);
    assert!(report.injected_faults >= 4);
    assert!(report.recovery_attempts >= 4);
    // rate 1.0 on every call: retries never succeed
    assert_eq!(report.recovered_attempts, 0);
    assert_eq!(report.autonomous_completions, 2);
}

#[tokio::test]
async fn test_recovery_rejects_out_of_range_rate() {
    let envelope = engine()
        .run_recovery_simulation(&RecoveryConfig::new(InjectionConfig::new(FailureType::Timeout, 2.0)))
        .await;

    assert_eq!(envelope.status, EnvelopeStatus::Error);
}
