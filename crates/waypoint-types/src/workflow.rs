//! Workflow execution domain types.
//!
//! These are the serializable records shared between the execution engine,
//! the checkpoint store, and any consumer of the event stream: statuses,
//! retry policy, checkpoints, suspension/cancellation metadata, lifecycle
//! events, and the durable `ExecutionRecord` the store contract is written
//! against.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Free-form scratch space shared across a run, distinct from the data
/// payload threaded between steps.
pub type WorkflowStateMap = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
///
/// Exactly one status is active at a time. From `Running` the reachable
/// terminal edges are Completed/Suspended/Cancelled/Error; `Suspended`
/// transitions back to `Running` only via resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Suspended,
    Cancelled,
    Error,
}

impl RunStatus {
    /// Whether this status ends the current running phase.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Per-run status of a single step attempt chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Success,
    Skipped,
    Cancelled,
    Suspended,
    Error,
}

// ---------------------------------------------------------------------------
// Step record
// ---------------------------------------------------------------------------

/// Per-run bookkeeping for one step.
///
/// Created when the step starts and retained for the run's lifetime; read
/// by hooks and by map steps referencing a sibling's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// The data payload the step was invoked with.
    pub input: Value,
    /// The step's output, once it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Current status of the step.
    pub status: StepStatus,
    /// Error message if the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    /// A fresh record for a step that just started.
    pub fn running(input: Value) -> Self {
        Self {
            input,
            output: None,
            status: StepStatus::Running,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry configuration: run-level default, overridable per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt (0 = no retries).
    #[serde(default)]
    pub attempts: u32,
    /// Delay between attempts in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            delay_ms: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint & terminal metadata
// ---------------------------------------------------------------------------

/// Snapshot sufficient to resume a suspended run from its exact suspension
/// point. Created only at a suspend boundary, consumed once per resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The data payload as of suspension.
    pub step_execution_state: Value,
    /// Indices of steps that had completed before the suspension.
    pub completed_steps: Vec<usize>,
    /// The shared scratch space as of suspension.
    #[serde(default)]
    pub workflow_state: WorkflowStateMap,
}

/// Terminal-state payload describing a suspension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionMetadata {
    /// When the run suspended.
    pub suspended_at: DateTime<Utc>,
    /// Why the run suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Index of the suspended step. Resume re-executes this step.
    pub step_index: usize,
    /// Sequence number of the last event emitted before suspension.
    pub last_event_sequence: u64,
    /// Opaque payload supplied by the suspending step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_data: Option<Value>,
    /// The checkpoint to restore from on resume.
    pub checkpoint: Checkpoint,
}

/// Terminal-state payload describing a cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationMetadata {
    /// When the run was cancelled.
    pub cancelled_at: DateTime<Utc>,
    /// Why the run was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

/// Token usage accumulated by externally-computed steps over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl UsageInfo {
    /// Fold another usage sample into this one.
    pub fn add(&mut self, other: UsageInfo) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Kind of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    WorkflowStart,
    WorkflowComplete,
    WorkflowSuspended,
    WorkflowCancelled,
    WorkflowError,
    StepStart,
    StepComplete,
    /// Custom event written by a step through its writer capability.
    StepOutput,
}

/// One immutable lifecycle event, ordered by `sequence` within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Event kind tag.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The run this event belongs to.
    pub execution_id: Uuid,
    /// Workflow or step name that produced the event.
    pub from: String,
    /// Input payload at emission time, if meaningful for the kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Output payload, if meaningful for the kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Status string carried on the event ("running", "success", ...).
    pub status: String,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Index of the step involved, when step-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    /// Monotonic per-run sequence number.
    pub sequence: u64,
    /// Free-form extra fields (reason, display name, error, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Execution record (persistence contract)
// ---------------------------------------------------------------------------

/// The durable per-execution record the checkpoint store persists.
///
/// No assumption about storage technology beyond this shape: the engine
/// writes it on suspend/cancel/complete/error and reads it back on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Stable across suspend/resume.
    pub execution_id: Uuid,
    /// The workflow definition this run executes.
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    /// The original run input.
    pub input: Value,
    /// Shared scratch space snapshot.
    #[serde(default)]
    pub workflow_state: WorkflowStateMap,
    /// Present while the run is suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension: Option<SuspensionMetadata>,
    /// Present once the run is cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationMetadata>,
    /// Ordered event log collected so far.
    #[serde(default)]
    pub events: Vec<WorkflowEvent>,
    /// Final output once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Extra fields (usage, error message, cancellation reason, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied to an `ExecutionRecord` by `update_state`.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub status: Option<RunStatus>,
    pub workflow_state: Option<WorkflowStateMap>,
    /// `Some(None)` clears the suspension metadata (resume starting).
    pub suspension: Option<Option<SuspensionMetadata>>,
    pub cancellation: Option<CancellationMetadata>,
    /// Appended to the record's event log, not a replacement.
    pub events: Option<Vec<WorkflowEvent>>,
    pub output: Option<Value>,
    pub metadata: Option<BTreeMap<String, Value>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
