//! D-tier (document) store: cron definitions and their execution history.

use crate::error::StoreError;
use crate::model::{CronDefinition, CronStatus, ExecutionRecord, ManifestOverrides};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventide_core::CronDefinitionId;
use std::collections::HashMap;
use std::sync::Mutex;

/// A partial update to a `CronDefinition`. Every field left `None` is
/// unchanged; this mirrors the abstract `update_by_id(fields)` store
/// operation without requiring a full read-modify-write by the caller.
#[derive(Debug, Clone, Default)]
pub struct CronDefinitionPatch {
    /// New lifecycle status.
    pub status: Option<CronStatus>,
    /// New last-fire timestamp.
    pub last_fire: Option<DateTime<Utc>>,
    /// New next-fire timestamp.
    pub next_fire: Option<DateTime<Utc>>,
    /// Whether to increment `exec_count` by one.
    pub increment_exec_count: bool,
    /// Whether to increment `error_count` by one.
    pub increment_error_count: bool,
    /// New last-error message.
    pub last_error: Option<String>,
    /// New event type (manifest upsert, subject to override flags).
    pub event_type: Option<String>,
    /// New action (manifest upsert, subject to override flags).
    pub action: Option<String>,
    /// New default payload (manifest upsert, subject to override flags).
    pub default_payload: Option<String>,
    /// New cron expression (manifest upsert, subject to override flags).
    pub cron_expression: Option<String>,
    /// New timezone (manifest upsert, subject to override flags).
    pub timezone: Option<String>,
    /// New override flags.
    pub overrides: Option<ManifestOverrides>,
}

/// Store interface for the D-tier (document store): cron definitions plus
/// their append-only execution history.
#[async_trait]
pub trait DStore: Send + Sync {
    /// Looks up a definition by its unique name.
    async fn find(&self, name: &str) -> Result<Option<CronDefinition>, StoreError>;

    /// Looks up a definition by id.
    async fn get(&self, id: CronDefinitionId) -> Result<Option<CronDefinition>, StoreError>;

    /// Returns active definitions due to fire at or before `now`, ordered by
    /// `(next_fire, id)`, bounded by `limit`.
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CronDefinition>, StoreError>;

    /// Inserts a new definition. Fails with `AlreadyExists` on name
    /// collision.
    async fn create(&self, definition: CronDefinition) -> Result<CronDefinitionId, StoreError>;

    /// Applies a partial update to a definition.
    async fn update_by_id(
        &self,
        id: CronDefinitionId,
        patch: CronDefinitionPatch,
    ) -> Result<(), StoreError>;

    /// Appends an execution record for a firing.
    async fn append_execution(&self, record: ExecutionRecord) -> Result<(), StoreError>;

    /// Lists execution records for a definition, most recent first, bounded
    /// by `limit`.
    async fn list_executions(
        &self,
        definition_id: CronDefinitionId,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Counts definitions currently `Active`.
    async fn count_active(&self) -> Result<u64, StoreError>;

    /// Deletes a definition by id. Returns whether a row was removed.
    async fn delete_by_id(&self, id: CronDefinitionId) -> Result<bool, StoreError>;
}

/// An in-memory `DStore` for tests and local development.
#[derive(Default)]
pub struct InMemoryDStore {
    definitions: Mutex<HashMap<CronDefinitionId, CronDefinition>>,
    executions: Mutex<Vec<ExecutionRecord>>,
}

impl InMemoryDStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_patch(def: &mut CronDefinition, patch: CronDefinitionPatch) {
    if let Some(status) = patch.status {
        def.status = status;
    }
    if let Some(last_fire) = patch.last_fire {
        def.last_fire = Some(last_fire);
    }
    if let Some(next_fire) = patch.next_fire {
        def.next_fire = Some(next_fire);
    }
    if patch.increment_exec_count {
        def.exec_count += 1;
    }
    if patch.increment_error_count {
        def.error_count += 1;
    }
    if let Some(last_error) = patch.last_error {
        def.last_error = Some(last_error);
    }
    if let Some(event_type) = patch.event_type {
        if !def.overrides.event_type {
            def.event_type = event_type;
        }
    }
    if let Some(action) = patch.action {
        if !def.overrides.action {
            def.action = action;
        }
    }
    if let Some(default_payload) = patch.default_payload {
        if !def.overrides.default_payload {
            def.default_payload = default_payload;
        }
    }
    if let Some(cron_expression) = patch.cron_expression {
        if !def.overrides.cron_expression {
            def.cron_expression = cron_expression;
        }
    }
    if let Some(timezone) = patch.timezone {
        if !def.overrides.timezone {
            def.timezone = timezone;
        }
    }
    if let Some(overrides) = patch.overrides {
        def.overrides = overrides;
    }
    def.updated_at = Utc::now();
}

#[async_trait]
impl DStore for InMemoryDStore {
    async fn find(&self, name: &str) -> Result<Option<CronDefinition>, StoreError> {
        Ok(self
            .definitions
            .lock()
            .unwrap()
            .values()
            .find(|d| d.name == name)
            .cloned())
    }

    async fn get(&self, id: CronDefinitionId) -> Result<Option<CronDefinition>, StoreError> {
        Ok(self.definitions.lock().unwrap().get(&id).cloned())
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CronDefinition>, StoreError> {
        let defs = self.definitions.lock().unwrap();
        let mut due: Vec<CronDefinition> = defs
            .values()
            .filter(|d| d.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|d| (d.next_fire, d.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn create(&self, definition: CronDefinition) -> Result<CronDefinitionId, StoreError> {
        let mut defs = self.definitions.lock().unwrap();
        if defs.values().any(|d| d.name == definition.name) {
            return Err(StoreError::AlreadyExists {
                id: definition.name.clone(),
            });
        }
        let id = definition.id;
        defs.insert(id, definition);
        Ok(id)
    }

    async fn update_by_id(
        &self,
        id: CronDefinitionId,
        patch: CronDefinitionPatch,
    ) -> Result<(), StoreError> {
        let mut defs = self.definitions.lock().unwrap();
        let def = defs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        apply_patch(def, patch);
        Ok(())
    }

    async fn append_execution(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        self.executions.lock().unwrap().push(record);
        Ok(())
    }

    async fn list_executions(
        &self,
        definition_id: CronDefinitionId,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut records: Vec<ExecutionRecord> = self
            .executions
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.definition_id == definition_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn count_active(&self) -> Result<u64, StoreError> {
        Ok(self
            .definitions
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.status == CronStatus::Active)
            .count() as u64)
    }

    async fn delete_by_id(&self, id: CronDefinitionId) -> Result<bool, StoreError> {
        Ok(self.definitions.lock().unwrap().remove(&id).is_some())
    }
}
