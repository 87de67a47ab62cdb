//! Mutable state of one workflow run.
//!
//! [`RunState`] is owned by the engine for the duration of an execution and
//! mutated only through explicit transition methods, so every status change
//! is a named edge rather than an ad-hoc field write. The shared pieces
//! steps can touch concurrently ([`SharedState`], [`UsageCounter`]) live
//! behind their own locks.

use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;
use waypoint_types::workflow::{
    CancellationMetadata, Checkpoint, RunStatus, SuspensionMetadata, UsageInfo, WorkflowStateMap,
};

// ---------------------------------------------------------------------------
// Shared scratch space
// ---------------------------------------------------------------------------

/// Run-scoped scratch space, shared with every step context.
///
/// Distinct from the data payload threaded between steps: any step may read
/// or write it at any time, and it is checkpointed alongside the payload.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<WorkflowStateMap>>,
}

impl SharedState {
    pub fn new(initial: WorkflowStateMap) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value);
    }

    /// Replace the whole map, keeping existing keys not present in `update`.
    pub fn merge(&self, update: WorkflowStateMap) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.extend(update);
    }

    pub fn snapshot(&self) -> WorkflowStateMap {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Usage counter
// ---------------------------------------------------------------------------

/// Thread-safe accumulator for per-run usage totals.
#[derive(Debug, Clone, Default)]
pub struct UsageCounter {
    inner: Arc<Mutex<UsageInfo>>,
}

impl UsageCounter {
    pub fn add(&self, sample: UsageInfo) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .add(sample);
    }

    pub fn total(&self) -> UsageInfo {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Everything the engine tracks about the run in flight.
#[derive(Debug)]
pub struct RunState {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    /// The original run input, immutable for the run's lifetime.
    pub input: Value,
    /// The payload flowing between steps: each step's output becomes the
    /// next step's data.
    pub data: Value,
    pub workflow_state: SharedState,
    pub usage: UsageCounter,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub suspension: Option<SuspensionMetadata>,
    pub cancellation: Option<CancellationMetadata>,
    pub error: Option<String>,
}

impl RunState {
    pub fn new(
        execution_id: Uuid,
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        input: Value,
        initial_state: WorkflowStateMap,
    ) -> Self {
        Self {
            execution_id,
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            status: RunStatus::Running,
            data: input.clone(),
            input,
            workflow_state: SharedState::new(initial_state),
            usage: UsageCounter::default(),
            started_at: Utc::now(),
            ended_at: None,
            suspension: None,
            cancellation: None,
            error: None,
        }
    }

    /// Restore payload and scratch space from a checkpoint (resume path).
    pub fn restore(&mut self, checkpoint: &Checkpoint) {
        self.data = checkpoint.step_execution_state.clone();
        self.workflow_state.merge(checkpoint.workflow_state.clone());
    }

    /// Snapshot the resumable parts of the run at a suspension boundary.
    pub fn checkpoint(&self, completed_steps: Vec<usize>) -> Checkpoint {
        Checkpoint {
            step_execution_state: self.data.clone(),
            completed_steps,
            workflow_state: self.workflow_state.snapshot(),
        }
    }

    pub fn suspend(
        &mut self,
        reason: Option<String>,
        step_index: usize,
        last_event_sequence: u64,
        suspend_data: Option<Value>,
        checkpoint: Checkpoint,
    ) {
        self.status = RunStatus::Suspended;
        self.ended_at = Some(Utc::now());
        self.suspension = Some(SuspensionMetadata {
            suspended_at: Utc::now(),
            reason,
            step_index,
            last_event_sequence,
            suspend_data,
            checkpoint,
        });
    }

    pub fn cancel(&mut self, reason: Option<String>) {
        self.status = RunStatus::Cancelled;
        self.ended_at = Some(Utc::now());
        self.cancellation = Some(CancellationMetadata {
            cancelled_at: Utc::now(),
            reason,
        });
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = RunStatus::Error;
        self.ended_at = Some(Utc::now());
        self.error = Some(message.into());
    }

    pub fn finish(&mut self) {
        self.status = RunStatus::Completed;
        self.ended_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
