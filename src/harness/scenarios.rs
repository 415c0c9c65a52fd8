use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::EngineError;
use crate::tools::{InMemoryDirectory, CALENDAR, DATA_FETCH, ENTITY_LOOKUP, TASK_LOOKUP};
use crate::types::{Decision, EntityContext, TaskContext};

/// Bumped whenever the deterministic set changes, so reports stay comparable.
pub const SCENARIO_SET_VERSION: &str = "2026.1";

/// "Today" for every harness run.
pub fn harness_as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 15).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low    => "low",
            Self::Medium => "medium",
            Self::High   => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id:                String,
    pub entity:            EntityContext,
    pub task:              TaskContext,
    pub complexity:        Complexity,
    pub expected_tools:    BTreeSet<String>,
    /// Whether the sandbox holds a `<entity>:records` dataset for this entity.
    pub has_records:       bool,
    pub expected_decision: Decision,
}

fn tools(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

/// The fixed scenario set, versioned by `SCENARIO_SET_VERSION`.
pub fn deterministic_scenarios() -> Vec<Scenario> {
    let all = [ENTITY_LOOKUP, TASK_LOOKUP, CALENDAR, DATA_FETCH];
    vec![
        Scenario {
            id:                "det-01".into(),
            entity:            EntityContext::new("Northwind Traders", "retail", "US"),
            task:              TaskContext::new("T-101", "Confirm registration details"),
            complexity:        Complexity::Low,
            expected_tools:    tools(&[ENTITY_LOOKUP]),
            has_records:       true,
            expected_decision: Decision::AutonomousComplete,
        },
        Scenario {
            id:                "det-02".into(),
            entity:            EntityContext::new("Blue Harbor Credit Union", "banking", "US"),
            task:              TaskContext { due_date: date(2026, 2, 27), ..TaskContext::new("T-102", "Check the annual filing deadline") },
            complexity:        Complexity::Low,
            expected_tools:    tools(&[ENTITY_LOOKUP, TASK_LOOKUP, CALENDAR]),
            has_records:       true,
            expected_decision: Decision::AutonomousComplete,
        },
        Scenario {
            id:                "det-03".into(),
            entity:            EntityContext::new("Acme Payments Ltd", "fintech", "UK").with_flag("late_filing"),
            task:              TaskContext { due_date: date(2026, 1, 30), ..TaskContext::new("T-103", "Review audit records and the licence renewal deadline") },
            complexity:        Complexity::Medium,
            expected_tools:    tools(&all),
            has_records:       true,
            expected_decision: Decision::AutonomousComplete,
        },
        Scenario {
            id:                "det-04".into(),
            entity:            EntityContext::new("Helios Energy GmbH", "energy", "DE"),
            task:              TaskContext::new("T-104", "Sanctions screening of counterparty data"),
            complexity:        Complexity::Medium,
            expected_tools:    tools(&[ENTITY_LOOKUP, DATA_FETCH]),
            has_records:       true,
            expected_decision: Decision::AutonomousComplete,
        },
        Scenario {
            id:                "det-05".into(),
            entity:            EntityContext::new("Orion Capital Partners", "asset_management", "LU")
                .with_flag("pep_exposure")
                .with_flag("prior_enforcement"),
            task:              TaskContext { due_date: date(2025, 12, 31), ..TaskContext::new("T-105", "Overdue filing: reconcile audit history and records") },
            complexity:        Complexity::High,
            expected_tools:    tools(&all),
            has_records:       true,
            expected_decision: Decision::AutonomousComplete,
        },
        Scenario {
            id:                "det-06".into(),
            entity:            EntityContext::new("Kestrel Logistics", "logistics", "SG").with_flag("missing_records"),
            task:              TaskContext { due_date: date(2026, 3, 31), ..TaskContext::new("T-106", "Audit data review before the renewal deadline") },
            complexity:        Complexity::High,
            expected_tools:    tools(&all),
            has_records:       false,
            expected_decision: Decision::Escalated,
        },
    ]
}

/// Relative weights of each complexity in a generated batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityMix {
    pub low:    f64,
    pub medium: f64,
    pub high:   f64,
}

impl Default for ComplexityMix {
    fn default() -> Self {
        Self { low: 0.5, medium: 0.3, high: 0.2 }
    }
}

impl ComplexityMix {
    pub fn validate(&self) -> Result<(), EngineError> {
        let weights = [self.low, self.medium, self.high];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(EngineError::Config("complexity weights must be non-negative with a positive sum".into()));
        }
        Ok(())
    }

    fn pick(&self, roll: f64) -> Complexity {
        let total = self.low + self.medium + self.high;
        let x = roll * total;
        if x < self.low {
            Complexity::Low
        } else if x < self.low + self.medium {
            Complexity::Medium
        } else {
            Complexity::High
        }
    }
}

const NAME_STEMS: &[&str] = &["Aurora", "Beacon", "Cobalt", "Delta", "Everest", "Falcon", "Granite", "Harbor", "Iris", "Juniper"];
const NAME_SUFFIXES: &[&str] = &["Holdings", "Capital", "Trading Co", "Services Ltd", "Group", "Partners"];
const CATEGORIES: &[&str] = &["banking", "fintech", "insurance", "retail", "energy", "logistics"];
const JURISDICTIONS: &[&str] = &["US", "UK", "DE", "SG", "LU", "IE"];
const FLAGS: &[&str] = &["late_filing", "pep_exposure", "prior_enforcement", "adverse_media", "ownership_change"];

/// (task description, tools the simulated analyst plans for it)
const LOW_TASKS: &[(&str, &[&str])] = &[
    ("Confirm registration details", &[ENTITY_LOOKUP]),
    ("Verify the entity profile", &[ENTITY_LOOKUP]),
];
const MEDIUM_TASKS: &[(&str, &[&str])] = &[
    ("Check the filing deadline", &[ENTITY_LOOKUP, TASK_LOOKUP, CALENDAR]),
    ("Review screening data", &[ENTITY_LOOKUP, DATA_FETCH]),
];
const HIGH_TASKS: &[(&str, &[&str])] = &[
    ("Audit records review ahead of the renewal deadline", &[ENTITY_LOOKUP, TASK_LOOKUP, CALENDAR, DATA_FETCH]),
    ("Overdue filing: reconcile history data", &[ENTITY_LOOKUP, TASK_LOOKUP, CALENDAR, DATA_FETCH]),
];

/// Seeded generator of synthetic scenarios. Same seed, same scenarios.
pub struct ScenarioGenerator {
    rng:  StdRng,
    seed: u64,
}

impl ScenarioGenerator {
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), seed }
    }

    fn choose<T: Copy>(&mut self, items: &[T]) -> T {
        items[self.rng.gen_range(0..items.len())]
    }

    pub fn generate(&mut self, count: usize, mix: &ComplexityMix) -> Vec<Scenario> {
        (0..count).map(|i| self.scenario(i, mix)).collect()
    }

    fn scenario(&mut self, index: usize, mix: &ComplexityMix) -> Scenario {
        let complexity = mix.pick(self.rng.gen::<f64>());
        let name = format!("{} {} {}", self.choose(NAME_STEMS), self.choose(NAME_SUFFIXES), index + 1);
        let mut entity = EntityContext::new(name, self.choose(CATEGORIES), self.choose(JURISDICTIONS));

        let flag_count = match complexity {
            Complexity::Low    => 0,
            Complexity::Medium => self.rng.gen_range(0..=1),
            Complexity::High   => self.rng.gen_range(1..=2),
        };
        for _ in 0..flag_count {
            let flag = self.choose(FLAGS);
            if !entity.history_flags.iter().any(|f| f == flag) {
                entity.history_flags.push(flag.to_string());
            }
        }

        let (description, expected) = match complexity {
            Complexity::Low    => self.choose(LOW_TASKS),
            Complexity::Medium => self.choose(MEDIUM_TASKS),
            Complexity::High   => self.choose(HIGH_TASKS),
        };
        let offset = self.rng.gen_range(-10..=60);
        let task = TaskContext::new(format!("G-{}-{}", self.seed, index + 1), description)
            .due(harness_as_of() + Duration::days(offset));

        Scenario {
            id:                format!("gen-{}-{:03}", self.seed, index + 1),
            entity,
            task,
            complexity,
            expected_tools:    tools(expected),
            has_records:       true,
            expected_decision: Decision::AutonomousComplete,
        }
    }
}

/// Sandbox records backing the built-in tools for a batch of scenarios.
pub fn scenario_directory(scenarios: &[Scenario]) -> InMemoryDirectory {
    scenarios.iter().fold(InMemoryDirectory::new(), |dir, s| {
        let dir = dir
            .with_entity(s.entity.clone())
            .with_task(s.entity.name.clone(), s.task.clone());
        if s.has_records {
            dir.with_dataset(
                format!("{}:records", s.entity.name),
                json!({
                    "filings": [{ "year": 2025, "on_time": !s.entity.history_flags.iter().any(|f| f == "late_filing") }],
                    "screening_hits": s.entity.history_flags.len(),
                }),
            )
        } else {
            dir
        }
    })
}
