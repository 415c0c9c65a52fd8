//! Long-lived memory of past executions, keyed by (entity, task).

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 (hex) of the entity name and task description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryKey(String);

impl MemoryKey {
    pub fn derive(entity: &str, task: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(entity.as_bytes());
        hasher.update([0u8]);
        hasher.update(task.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub key:           MemoryKey,
    pub entity:        String,
    pub content:       String,
    pub summary:       String,
    pub access_count:  u64,
    /// 1 on creation, bumped by every later write.
    pub revision:      u64,
    pub created_at:    DateTime<Utc>,
    pub updated_at:    DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
    /// Store-wide write sequence; breaks ties between equal timestamps.
    seq:               u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<MemoryKey, Memory>,
    seq:     u64,
}

/// Concurrency-safe in-process memory store. Nothing is ever evicted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the memory, or replaces its content and summary and bumps the revision.
    pub fn save(&self, key: &MemoryKey, entity: &str, content: impl Into<String>, summary: impl Into<String>) -> Memory {
        let content = content.into();
        self.write(key, entity, summary.into(), move |existing| {
            existing.content = content;
        })
    }

    /// Appends to the existing content (newline separated), or creates the memory.
    pub fn append(&self, key: &MemoryKey, entity: &str, content: impl Into<String>, summary: impl Into<String>) -> Memory {
        let content = content.into();
        self.write(key, entity, summary.into(), move |existing| {
            if !existing.content.is_empty() {
                existing.content.push('\n');
            }
            existing.content.push_str(&content);
        })
    }

    fn write(&self, key: &MemoryKey, entity: &str, summary: String, apply: impl FnOnce(&mut Memory)) -> Memory {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.seq += 1;
        let seq = inner.seq;
        let now = Utc::now();

        let memory = inner.entries.entry(key.clone()).or_insert_with(|| Memory {
            key:           key.clone(),
            entity:        entity.to_string(),
            content:       String::new(),
            summary:       String::new(),
            access_count:  0,
            revision:      0,
            created_at:    now,
            updated_at:    now,
            last_accessed: None,
            seq,
        });
        apply(memory);
        memory.summary = summary;
        memory.revision += 1;
        memory.updated_at = now;
        memory.seq = seq;

        tracing::debug!(key = %key, entity, revision = memory.revision, "memory saved");
        memory.clone()
    }

    /// Returns the memory and counts the read as one access.
    pub fn get(&self, key: &MemoryKey) -> Option<Memory> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let memory = inner.entries.get_mut(key)?;
        memory.access_count += 1;
        memory.last_accessed = Some(Utc::now());
        Some(memory.clone())
    }

    /// Up to `limit` memories of `entity`, most recently updated first.
    /// Not counted as an access.
    pub fn recent_for(&self, entity: &str, limit: usize) -> Vec<Memory> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<Memory> = inner.entries.values()
            .filter(|m| m.entity == entity)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.seq.cmp(&a.seq));
        found.truncate(limit);
        found
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
