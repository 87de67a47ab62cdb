//! Execution persistence contract and the in-memory default.
//!
//! The engine persists run lifecycle through an [`ExecutionStore`] injected
//! at construction. The contract is three operations over the serializable
//! [`ExecutionRecord`]; nothing about the storage technology leaks into the
//! engine.

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;
use waypoint_types::workflow::{ExecutionRecord, StatePatch};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("execution {0} not found")]
    NotFound(Uuid),

    #[error("store backend error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Durable execution state, keyed by execution id.
///
/// `set_state` creates or replaces a record; `update_state` applies a
/// partial patch to an existing one and must fail with [`StoreError::NotFound`]
/// when the record does not exist.
pub trait ExecutionStore: Send + Sync {
    fn set_state(
        &self,
        record: ExecutionRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_state(
        &self,
        execution_id: Uuid,
    ) -> impl Future<Output = Result<Option<ExecutionRecord>, StoreError>> + Send;

    fn update_state(
        &self,
        execution_id: Uuid,
        patch: StatePatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Default store backed by a concurrent map. State lives as long as the
/// process; suitable for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    records: DashMap<Uuid, ExecutionRecord>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    async fn set_state(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        self.records.insert(record.execution_id, record);
        Ok(())
    }

    async fn get_state(&self, execution_id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.records.get(&execution_id).map(|r| r.clone()))
    }

    async fn update_state(
        &self,
        execution_id: Uuid,
        patch: StatePatch,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .records
            .get_mut(&execution_id)
            .ok_or(StoreError::NotFound(execution_id))?;
        apply_patch(entry.value_mut(), patch);
        Ok(())
    }
}

/// Apply a partial update; `None` fields leave the record untouched.
pub fn apply_patch(record: &mut ExecutionRecord, patch: StatePatch) {
    if let Some(status) = patch.status {
        record.status = status;
    }
    if let Some(workflow_state) = patch.workflow_state {
        record.workflow_state = workflow_state;
    }
    if let Some(suspension) = patch.suspension {
        record.suspension = suspension;
    }
    if let Some(cancellation) = patch.cancellation {
        record.cancellation = Some(cancellation);
    }
    if let Some(events) = patch.events {
        // each running phase appends only its own new events
        record.events.extend(events);
    }
    if let Some(output) = patch.output {
        record.output = Some(output);
    }
    if let Some(metadata) = patch.metadata {
        record.metadata.extend(metadata);
    }
    record.updated_at = Utc::now();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
