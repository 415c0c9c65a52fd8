use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::RunSummary;

/// Persistence collaborator for finished runs.
///
/// Called once per run after the loop has settled on a decision. Errors are
/// reported back as strings and never fail the run.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn persist(&self, summary: &RunSummary) -> Result<(), String>;
}

/// In-memory sink for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    summaries: Mutex<Vec<RunSummary>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        self.summaries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.summaries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn persist(&self, summary: &RunSummary) -> Result<(), String> {
        self.summaries.lock().unwrap_or_else(|e| e.into_inner()).push(summary.clone());
        Ok(())
    }
}

/// Sink writing one row per run into a SQLite database.
pub struct SqliteAuditSink {
    path: PathBuf,
}

impl SqliteAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let conn = rusqlite::Connection::open(&path).map_err(|e| e.to_string())?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS run_summaries (
                run_id      TEXT PRIMARY KEY,
                entity      TEXT NOT NULL,
                task_id     TEXT NOT NULL,
                decision    TEXT NOT NULL,
                confidence  REAL NOT NULL,
                summary     TEXT NOT NULL,
                finished_at TEXT NOT NULL
            )",
            [],
        ).map_err(|e| e.to_string())?;
        Ok(Self { path })
    }

    fn get_conn(&self) -> Result<rusqlite::Connection, String> {
        rusqlite::Connection::open(&self.path).map_err(|e| e.to_string())
    }

    pub fn load(&self, run_id: Uuid) -> Result<Option<RunSummary>, String> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT summary FROM run_summaries WHERE run_id = ?1")
            .map_err(|e| e.to_string())?;
        let mut rows = stmt.query(rusqlite::params![run_id.to_string()]).map_err(|e| e.to_string())?;
        match rows.next().map_err(|e| e.to_string())? {
            Some(row) => {
                let json: String = row.get(0).map_err(|e| e.to_string())?;
                serde_json::from_str(&json).map(Some).map_err(|e| e.to_string())
            }
            None => Ok(None),
        }
    }

    /// All summaries for an entity, most recent first.
    pub fn list_for_entity(&self, entity: &str) -> Result<Vec<RunSummary>, String> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT summary FROM run_summaries WHERE entity = ?1 ORDER BY finished_at DESC"
        ).map_err(|e| e.to_string())?;
        let rows = stmt.query_map(rusqlite::params![entity], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;
        let mut summaries = Vec::new();
        for json in rows {
            let json = json.map_err(|e| e.to_string())?;
            summaries.push(serde_json::from_str(&json).map_err(|e| e.to_string())?);
        }
        Ok(summaries)
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn persist(&self, summary: &RunSummary) -> Result<(), String> {
        let conn = self.get_conn()?;
        let json = serde_json::to_string(summary).map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT OR REPLACE INTO run_summaries (run_id, entity, task_id, decision, confidence, summary, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                summary.run_id.to_string(),
                summary.entity,
                summary.task_id,
                summary.decision.to_string(),
                summary.confidence,
                json,
                timestamp(&summary.finished_at),
            ],
        ).map_err(|e| e.to_string())?;
        tracing::debug!(run_id = %summary.run_id, entity = %summary.entity, "run summary persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Decision;

    fn summary(entity: &str, minutes_ago: i64) -> RunSummary {
        RunSummary {
            run_id:      Uuid::new_v4(),
            entity:      entity.to_string(),
            task_id:     "T-1".into(),
            task:        "Review".into(),
            decision:    Decision::AutonomousComplete,
            confidence:  0.8,
            steps:       3,
            attempts:    3,
            failures:    Vec::new(),
            finished_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn memory_sink_keeps_summaries() {
        let sink = MemoryAuditSink::new();
        sink.persist(&summary("Acme", 0)).await.unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.summaries()[0].entity, "Acme");
    }

    #[tokio::test]
    async fn sqlite_sink_round_trips_and_orders_by_recency() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteAuditSink::new(dir.path().join("audit.db")).unwrap();
        let old = summary("Acme", 10);
        let new = summary("Acme", 1);
        sink.persist(&old).await.unwrap();
        sink.persist(&new).await.unwrap();
        sink.persist(&summary("Other", 0)).await.unwrap();

        assert_eq!(sink.load(old.run_id).unwrap(), Some(old.clone()));
        let listed = sink.list_for_entity("Acme").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].run_id, new.run_id);
        assert!(sink.load(Uuid::new_v4()).unwrap().is_none());
    }
}
