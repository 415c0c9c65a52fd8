use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Plan step the entry refers to, if any.
    pub step:      Option<usize>,
    pub state:     String,
    pub event:     String,
    pub data:      String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self { Self { entries: Vec::new() } }

    /// Records an entry and mirrors it to the `tracing` subscriber.
    pub fn log(&mut self, step: Option<usize>, state: &str, event: &str, data: impl Into<String>) {
        let data = data.into();
        tracing::debug!(?step, state, event, data = %data, "agent trace");
        self.entries.push(TraceEntry {
            step,
            state:     state.to_string(),
            event:     event.to_string(),
            data,
            timestamp: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns all entries for a given state name
    pub fn for_state(&self, state: &str) -> Vec<&TraceEntry> {
        self.entries.iter().filter(|e| e.state == state).collect()
    }

    pub fn for_event(&self, event: &str) -> Vec<&TraceEntry> {
        self.entries.iter().filter(|e| e.event == event).collect()
    }

    /// Serializes the trace to a pretty-printed JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.entries)
            .unwrap_or_else(|_| "[]".to_string())
    }

    /// Renders a fixed-width table, one row per entry.
    pub fn render_table(&self) -> String {
        let mut out = format!("{:<6} {:<12} {:<22} {}\n", "step", "state", "event", "data");
        out.push_str(&"─".repeat(80));
        out.push('\n');
        for e in &self.entries {
            let step = e.step.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "{:<6} {:<12} {:<22} {}\n",
                step, e.state, e.event, e.data.chars().take(40).collect::<String>()
            ));
        }
        out
    }
}
