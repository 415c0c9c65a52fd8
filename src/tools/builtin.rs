//! Built-in compliance tools over a read-only `Directory` of records.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ToolError;
use crate::tools::{Tool, ToolRegistry};
use crate::types::{EntityContext, TaskContext};

pub const ENTITY_LOOKUP: &str = "entity_lookup";
pub const TASK_LOOKUP: &str = "task_lookup";
pub const CALENDAR: &str = "calendar";
pub const DATA_FETCH: &str = "data_fetch";

/// A task as stored in the directory, with its owning entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub entity: String,
    #[serde(flatten)]
    pub task:   TaskContext,
}

/// Read-only source of entity, task and dataset records.
pub trait Directory: Send + Sync {
    fn entity(&self, name: &str) -> Option<EntityContext>;

    fn task(&self, id: &str) -> Option<TaskRecord>;

    fn tasks_for(&self, entity: &str) -> Vec<TaskRecord>;

    fn dataset(&self, resource: &str) -> Option<Value>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    entities: HashMap<String, EntityContext>,
    tasks:    Vec<TaskRecord>,
    datasets: HashMap<String, Value>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityContext) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn with_task(mut self, entity: impl Into<String>, task: TaskContext) -> Self {
        self.tasks.push(TaskRecord { entity: entity.into(), task });
        self
    }

    pub fn with_dataset(mut self, resource: impl Into<String>, data: Value) -> Self {
        self.datasets.insert(resource.into(), data);
        self
    }
}

impl Directory for InMemoryDirectory {
    fn entity(&self, name: &str) -> Option<EntityContext> {
        self.entities.get(name).cloned()
    }

    fn task(&self, id: &str) -> Option<TaskRecord> {
        self.tasks.iter().find(|t| t.task.id == id).cloned()
    }

    fn tasks_for(&self, entity: &str) -> Vec<TaskRecord> {
        self.tasks.iter().filter(|t| t.entity == entity).cloned().collect()
    }

    fn dataset(&self, resource: &str) -> Option<Value> {
        self.datasets.get(resource).cloned()
    }
}

fn str_arg<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

fn date_arg(input: &Value, key: &str) -> Result<Option<NaiveDate>, ToolError> {
    match str_arg(input, key) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| ToolError::InvalidInput(format!("'{}' is not a YYYY-MM-DD date: {}", key, e))),
    }
}

// ── entity_lookup ───────────────────────────────────────────────────────

pub struct EntityLookupTool {
    directory: Arc<dyn Directory>,
}

impl EntityLookupTool {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for EntityLookupTool {
    fn name(&self) -> &str { ENTITY_LOOKUP }

    fn description(&self) -> &str {
        "Look up an entity's profile: category, jurisdiction and history flags."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "entity": { "type": "string" } },
            "required": ["entity"]
        })
    }

    async fn call(&self, input: &Value) -> Result<Value, ToolError> {
        let name = str_arg(input, "entity")
            .ok_or_else(|| ToolError::InvalidInput("missing 'entity'".into()))?;
        let entity = self.directory.entity(name)
            .ok_or_else(|| ToolError::MissingResult(format!("no entity named '{}'", name)))?;
        Ok(json!({
            "entity": entity.name,
            "category": entity.category,
            "jurisdiction": entity.jurisdiction,
            "history_flags": entity.history_flags,
            "flag_count": entity.history_flags.len(),
        }))
    }
}

// ── task_lookup ─────────────────────────────────────────────────────────

pub struct TaskLookupTool {
    directory: Arc<dyn Directory>,
}

impl TaskLookupTool {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for TaskLookupTool {
    fn name(&self) -> &str { TASK_LOOKUP }

    fn description(&self) -> &str {
        "Fetch a task by 'task_id', or every task of an 'entity' when no id is given."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string" },
                "entity": { "type": "string" }
            }
        })
    }

    async fn call(&self, input: &Value) -> Result<Value, ToolError> {
        if let Some(id) = str_arg(input, "task_id") {
            let record = self.directory.task(id)
                .ok_or_else(|| ToolError::MissingResult(format!("no task with id '{}'", id)))?;
            return serde_json::to_value(record).map_err(|e| ToolError::DegradedOutput(e.to_string()));
        }

        let entity = str_arg(input, "entity")
            .ok_or_else(|| ToolError::InvalidInput("need 'task_id' or 'entity'".into()))?;
        let tasks = self.directory.tasks_for(entity);
        if tasks.is_empty() {
            return Err(ToolError::MissingResult(format!("no tasks for '{}'", entity)));
        }
        Ok(json!({ "entity": entity, "count": tasks.len(), "tasks": tasks }))
    }
}

// ── calendar ────────────────────────────────────────────────────────────

/// Date arithmetic relative to an as-of date (today unless pinned).
pub struct CalendarTool {
    as_of: Option<NaiveDate>,
}

impl CalendarTool {
    pub fn new() -> Self {
        Self { as_of: None }
    }

    /// Pins "today", which keeps harness runs reproducible.
    pub fn as_of(date: NaiveDate) -> Self {
        Self { as_of: Some(date) }
    }
}

impl Default for CalendarTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Weekdays in `(from, to]`.
fn business_days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    from.iter_days()
        .skip(1)
        .take_while(|d| *d <= to)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as i64
}

#[async_trait]
impl Tool for CalendarTool {
    fn name(&self) -> &str { CALENDAR }

    fn description(&self) -> &str {
        "Compute days remaining, business days remaining and overdue status for a due date."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "due_date": { "type": "string", "format": "date" },
                "as_of": { "type": "string", "format": "date" }
            },
            "required": ["due_date"]
        })
    }

    async fn call(&self, input: &Value) -> Result<Value, ToolError> {
        let due = date_arg(input, "due_date")?
            .ok_or_else(|| ToolError::InvalidInput("missing 'due_date'".into()))?;
        let as_of = date_arg(input, "as_of")?
            .or(self.as_of)
            .unwrap_or_else(|| Utc::now().date_naive());

        let days_remaining = (due - as_of).num_days();
        Ok(json!({
            "due_date": due.to_string(),
            "as_of": as_of.to_string(),
            "days_remaining": days_remaining,
            "overdue": days_remaining < 0,
            "business_days_remaining": business_days_between(as_of, due),
        }))
    }
}

// ── data_fetch ──────────────────────────────────────────────────────────

pub struct DataFetchTool {
    directory: Arc<dyn Directory>,
}

impl DataFetchTool {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for DataFetchTool {
    fn name(&self) -> &str { DATA_FETCH }

    fn description(&self) -> &str {
        "Fetch a named dataset, e.g. '<entity>:records'."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "resource": { "type": "string" } },
            "required": ["resource"]
        })
    }

    async fn call(&self, input: &Value) -> Result<Value, ToolError> {
        let resource = str_arg(input, "resource")
            .ok_or_else(|| ToolError::InvalidInput("missing 'resource'".into()))?;
        let data = self.directory.dataset(resource)
            .ok_or_else(|| ToolError::MissingResult(format!("dataset '{}' not found", resource)))?;
        Ok(json!({ "resource": resource, "data": data }))
    }
}

/// Registers the four built-in tools. `as_of` pins the calendar's notion of today.
pub fn register_builtin_tools(registry: &mut ToolRegistry, directory: Arc<dyn Directory>, as_of: Option<NaiveDate>) {
    registry.register(Arc::new(EntityLookupTool::new(directory.clone())));
    registry.register(Arc::new(TaskLookupTool::new(directory.clone())));
    registry.register(Arc::new(match as_of {
        Some(date) => CalendarTool::as_of(date),
        None       => CalendarTool::new(),
    }));
    registry.register(Arc::new(DataFetchTool::new(directory)));
}
