//! The execution engine.
//!
//! One active step index at a time: `running -> {running(next), suspended,
//! cancelled, error, completed}`. A fresh run starts at index 0; a resume
//! restores the checkpoint and re-enters at the suspended index with
//! `resume_data` visible only to that first re-executed step. Every
//! terminal transition follows the same order: emit the terminal event,
//! best-effort store write (failures logged, never fatal), independently
//! guarded hooks, then the result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;
use waypoint_types::workflow::{
    CancellationMetadata, Checkpoint, EventKind, ExecutionRecord, RetryPolicy, RunStatus,
    StatePatch, StepRecord, StepStatus, SuspensionMetadata, UsageInfo, WorkflowEvent,
    WorkflowStateMap,
};

use super::definition::Workflow;
use super::event::{EventDraft, EventSink, EventWriter};
use super::guardrail::{Guardrail, apply_guardrails, apply_input_guardrails};
use super::hooks::{self, HookContext};
use super::signal::{InterruptKind, RunSignal, race_signal, wait_with_signal};
use super::state::RunState;
use super::step::{Step, StepContext, StepError, StepOutput, StepRecords};
use super::store::{ExecutionStore, StoreError};

// ---------------------------------------------------------------------------
// Errors & options
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("execution {0} not found")]
    NotFound(Uuid),

    #[error("execution {execution_id} is {status:?}, only suspended runs can resume")]
    NotSuspended {
        execution_id: Uuid,
        status: RunStatus,
    },

    #[error("step '{0}' not found in workflow")]
    UnknownStep(String),

    #[error("execution {0} is not active")]
    NotActive(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run task failed: {0}")]
    Task(String),
}

/// Per-run options for [`Engine::run`].
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Caller-supplied execution id; generated when absent.
    pub execution_id: Option<Uuid>,
    /// Caller-held signal for external suspend/cancel.
    pub signal: Option<RunSignal>,
    /// Overrides the workflow's run-level retry default.
    pub retry: Option<RetryPolicy>,
    /// Seed for the shared scratch space.
    pub initial_state: WorkflowStateMap,
    /// Appended after the workflow's own input guardrails.
    pub input_guardrails: Vec<Arc<dyn Guardrail>>,
    /// Appended after the workflow's own output guardrails.
    pub output_guardrails: Vec<Arc<dyn Guardrail>>,
}

#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    /// Override the resume index by step id instead of the checkpointed
    /// suspension index.
    pub step_id: Option<String>,
}

/// Terminal handle for one running phase.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub status: RunStatus,
    /// Final output; `None` unless the run completed.
    pub result: Option<Value>,
    pub usage: UsageInfo,
    pub suspension: Option<SuspensionMetadata>,
    pub cancellation: Option<CancellationMetadata>,
    pub error: Option<String>,
    /// Step records of this running phase.
    pub steps: BTreeMap<String, StepRecord>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

pub(crate) struct ResumeFrom {
    checkpoint: Checkpoint,
    resume_index: usize,
    resume_data: Option<Value>,
    last_event_sequence: u64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The workflow interpreter, generic over its checkpoint store.
///
/// Holds its own registry of active run signals, so external
/// suspend/cancel is addressed per engine instance rather than through any
/// process-wide state.
pub struct Engine<S> {
    store: Arc<S>,
    active: Arc<DashMap<Uuid, RunSignal>>,
}

impl<S> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            active: self.active.clone(),
        }
    }
}

impl<S: ExecutionStore + 'static> Engine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    /// Execute a workflow to its next terminal status.
    ///
    /// The returned result carries the terminal status; step failures end
    /// up as `status == Error` inside it, not as an `Err` here. `Err` is
    /// reserved for the engine's own failures (store unreachable at run
    /// creation, bad resume targets).
    pub async fn run(
        &self,
        workflow: &Workflow,
        input: Value,
        options: RunOptions,
    ) -> Result<ExecutionResult, EngineError> {
        self.execute(workflow, input, options, None, None).await
    }

    /// Resume a suspended execution, re-entering at the checkpointed step.
    pub async fn resume(
        &self,
        workflow: &Workflow,
        execution_id: Uuid,
        resume_data: Option<Value>,
        options: ResumeOptions,
    ) -> Result<ExecutionResult, EngineError> {
        self.resume_with_live(workflow, execution_id, resume_data, options, None)
            .await
    }

    /// Request suspension of an active run; effective at its next signal
    /// check.
    pub fn suspend(&self, execution_id: Uuid, reason: Option<String>) -> Result<(), EngineError> {
        let signal = self
            .active
            .get(&execution_id)
            .ok_or(EngineError::NotActive(execution_id))?;
        signal.suspend(reason);
        Ok(())
    }

    /// Request cancellation of an active run; wins over any pending
    /// suspend.
    pub fn cancel(&self, execution_id: Uuid, reason: Option<String>) -> Result<(), EngineError> {
        let signal = self
            .active
            .get(&execution_id)
            .ok_or(EngineError::NotActive(execution_id))?;
        signal.cancel(reason);
        Ok(())
    }

    pub fn is_active(&self, execution_id: Uuid) -> bool {
        self.active.contains_key(&execution_id)
    }

    pub(crate) async fn resume_with_live(
        &self,
        workflow: &Workflow,
        execution_id: Uuid,
        resume_data: Option<Value>,
        options: ResumeOptions,
        live: Option<mpsc::UnboundedSender<WorkflowEvent>>,
    ) -> Result<ExecutionResult, EngineError> {
        let record = self
            .store
            .get_state(execution_id)
            .await?
            .ok_or(EngineError::NotFound(execution_id))?;
        let suspension = match (record.status, record.suspension) {
            (RunStatus::Suspended, Some(suspension)) => suspension,
            (status, _) => {
                return Err(EngineError::NotSuspended {
                    execution_id,
                    status,
                });
            }
        };

        let resume_index = match &options.step_id {
            Some(step_id) => workflow
                .step_index(step_id)
                .ok_or_else(|| EngineError::UnknownStep(step_id.clone()))?,
            None => suspension.step_index,
        };

        let resume = ResumeFrom {
            checkpoint: suspension.checkpoint,
            resume_index,
            resume_data,
            last_event_sequence: suspension.last_event_sequence,
        };
        // the resumed phase gets a fresh signal; the suspended phase's
        // token has already tripped
        let run_options = RunOptions {
            execution_id: Some(execution_id),
            ..Default::default()
        };
        self.execute(workflow, record.input, run_options, Some(resume), live)
            .await
    }

    pub(crate) async fn execute(
        &self,
        workflow: &Workflow,
        input: Value,
        options: RunOptions,
        resume: Option<ResumeFrom>,
        live: Option<mpsc::UnboundedSender<WorkflowEvent>>,
    ) -> Result<ExecutionResult, EngineError> {
        let execution_id = options.execution_id.unwrap_or_else(Uuid::now_v7);
        let signal = options.signal.clone().unwrap_or_default();
        self.active.insert(execution_id, signal.clone());

        let span = tracing::info_span!(
            "workflow.run",
            workflow_id = %workflow.id,
            execution_id = %execution_id,
            resumed = resume.is_some(),
        );
        let outcome = self
            .drive(workflow, input, options, resume, live, execution_id, signal)
            .instrument(span)
            .await;

        self.active.remove(&execution_id);
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        workflow: &Workflow,
        input: Value,
        options: RunOptions,
        resume: Option<ResumeFrom>,
        live: Option<mpsc::UnboundedSender<WorkflowEvent>>,
        execution_id: Uuid,
        signal: RunSignal,
    ) -> Result<ExecutionResult, EngineError> {
        let retry = options.retry.unwrap_or(workflow.retry);
        let start_sequence = resume.as_ref().map_or(0, |r| r.last_event_sequence);
        let sink = Arc::new(EventSink::new(execution_id, start_sequence, live));
        let records = StepRecords::new();
        let mut state = RunState::new(
            execution_id,
            &workflow.id,
            &workflow.name,
            input.clone(),
            options.initial_state,
        );

        let mut start_index = 0;
        let mut resume_data = None;
        if let Some(resume) = &resume {
            state.restore(&resume.checkpoint);
            start_index = resume.resume_index;
            resume_data = resume.resume_data.clone();
            // clearing the suspension begins a fresh running phase; a
            // failure here must abort the resume, not fork a new run
            self.store
                .update_state(
                    execution_id,
                    StatePatch {
                        status: Some(RunStatus::Running),
                        suspension: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
            tracing::info!(
                execution_id = %execution_id,
                step_index = start_index,
                "resuming suspended workflow run"
            );
        } else {
            self.store
                .set_state(ExecutionRecord {
                    execution_id,
                    workflow_id: workflow.id.clone(),
                    workflow_name: workflow.name.clone(),
                    status: RunStatus::Running,
                    input: input.clone(),
                    workflow_state: state.workflow_state.snapshot(),
                    suspension: None,
                    cancellation: None,
                    events: Vec::new(),
                    output: None,
                    metadata: BTreeMap::new(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
                .await?;
            tracing::info!(
                execution_id = %execution_id,
                workflow_id = %workflow.id,
                "workflow run started"
            );
        }

        let mut start_event =
            EventDraft::new(EventKind::WorkflowStart, workflow.name.clone(), "running")
                .with_input(state.data.clone());
        if let Some(purpose) = &workflow.purpose {
            start_event = start_event.with_meta("purpose", json!(purpose));
        }
        sink.emit(start_event);

        let rails: Vec<Arc<dyn Guardrail>> = workflow
            .input_guardrails
            .iter()
            .chain(options.input_guardrails.iter())
            .cloned()
            .collect();
        if resume.is_none() {
            match apply_input_guardrails(state.data.clone(), &rails).await {
                Ok(data) => state.data = data,
                Err(error) => {
                    return Ok(self
                        .finalize_error(workflow, &mut state, &sink, &records, error.to_string())
                        .await);
                }
            }
        } else if let Some(payload) = resume_data.take() {
            // the resume payload is external input too and passes through
            // the same chain
            match apply_input_guardrails(payload, &rails).await {
                Ok(payload) => resume_data = Some(payload),
                Err(error) => {
                    return Ok(self
                        .finalize_error(workflow, &mut state, &sink, &records, error.to_string())
                        .await);
                }
            }
        }

        let mut index = start_index;
        while index < workflow.steps.len() {
            if let Some(interrupt) = signal.interrupt() {
                return Ok(match interrupt.kind {
                    InterruptKind::Cancel => {
                        self.finalize_cancelled(
                            workflow,
                            &mut state,
                            &sink,
                            &records,
                            interrupt.reason,
                        )
                        .await
                    }
                    InterruptKind::Suspend => {
                        self.finalize_suspended(
                            workflow,
                            &mut state,
                            &sink,
                            &records,
                            interrupt.reason,
                            index,
                            None,
                        )
                        .await
                    }
                });
            }

            let step = &workflow.steps[index];
            records.start(&step.id, state.data.clone());
            sink.emit(
                EventDraft::new(EventKind::StepStart, step.display_name(), "running")
                    .at_step(index)
                    .with_input(state.data.clone()),
            );
            hooks::invoke(
                "on_step_start",
                &workflow.hooks.on_step_start,
                self.hook_ctx(&state, &records, Some((step, index))),
            )
            .await;

            let limit = workflow.effective_retries(step);
            let mut attempt: u32 = 0;
            loop {
                let ctx = StepContext {
                    data: state.data.clone(),
                    input: state.input.clone(),
                    workflow_state: state.workflow_state.clone(),
                    signal: signal.clone(),
                    resume_data: if resume.is_some() && index == start_index {
                        resume_data.clone()
                    } else {
                        None
                    },
                    retry_count: attempt,
                    records: records.clone(),
                    writer: EventWriter::new(sink.clone(), step.display_name(), index),
                    usage: state.usage.clone(),
                };

                let attempt_span = tracing::info_span!(
                    "workflow.step",
                    step_id = %step.id,
                    step_kind = step.kind_name(),
                    step_index = index,
                    attempt,
                );
                let outcome = match race_signal(&signal, step.execute(ctx))
                    .instrument(attempt_span)
                    .await
                {
                    Ok(step_outcome) => step_outcome,
                    Err(interrupt) => Err(interrupt.into()),
                };

                match outcome {
                    Ok(StepOutput { value, skipped }) => {
                        let status = if skipped {
                            StepStatus::Skipped
                        } else {
                            StepStatus::Success
                        };
                        records.finish(&step.id, status, Some(value.clone()));
                        sink.emit(
                            EventDraft::new(
                                EventKind::StepComplete,
                                step.display_name(),
                                if skipped { "skipped" } else { "success" },
                            )
                            .at_step(index)
                            .with_output(value.clone()),
                        );
                        state.data = value;
                        hooks::invoke(
                            "on_step_end",
                            &workflow.hooks.on_step_end,
                            self.hook_ctx(&state, &records, Some((step, index))),
                        )
                        .await;
                        break;
                    }
                    Err(StepError::Suspended { reason, data }) => {
                        // a cancel that raced the suspension still wins
                        if let Some(interrupt) = signal.interrupt()
                            && interrupt.kind == InterruptKind::Cancel
                        {
                            records.fail(&step.id, StepStatus::Cancelled, "run cancelled");
                            return Ok(self
                                .finalize_cancelled(
                                    workflow,
                                    &mut state,
                                    &sink,
                                    &records,
                                    interrupt.reason,
                                )
                                .await);
                        }
                        records.fail(&step.id, StepStatus::Suspended, "run suspended");
                        return Ok(self
                            .finalize_suspended(
                                workflow, &mut state, &sink, &records, reason, index, data,
                            )
                            .await);
                    }
                    Err(StepError::Cancelled { reason }) => {
                        records.fail(&step.id, StepStatus::Cancelled, "run cancelled");
                        sink.emit(
                            EventDraft::new(
                                EventKind::StepComplete,
                                step.display_name(),
                                "cancelled",
                            )
                            .at_step(index),
                        );
                        return Ok(self
                            .finalize_cancelled(workflow, &mut state, &sink, &records, reason)
                            .await);
                    }
                    Err(error @ StepError::Guardrail(_)) => {
                        // guardrail blocks are policy outcomes, never retried
                        let message = error.to_string();
                        records.fail(&step.id, StepStatus::Error, &message);
                        sink.emit(
                            EventDraft::new(EventKind::StepComplete, step.display_name(), "error")
                                .at_step(index)
                                .with_meta("error", json!(message)),
                        );
                        return Ok(self
                            .finalize_error(workflow, &mut state, &sink, &records, message)
                            .await);
                    }
                    Err(StepError::Failed(message)) => {
                        if attempt < limit {
                            tracing::warn!(
                                execution_id = %execution_id,
                                step_id = %step.id,
                                attempt,
                                error = %message,
                                "step failed; retrying"
                            );
                            if retry.delay_ms > 0
                                && let Err(interrupt) = wait_with_signal(
                                    &signal,
                                    Duration::from_millis(retry.delay_ms),
                                )
                                .await
                            {
                                return Ok(match interrupt.kind {
                                    InterruptKind::Cancel => {
                                        records.fail(
                                            &step.id,
                                            StepStatus::Cancelled,
                                            "run cancelled",
                                        );
                                        self.finalize_cancelled(
                                            workflow,
                                            &mut state,
                                            &sink,
                                            &records,
                                            interrupt.reason,
                                        )
                                        .await
                                    }
                                    InterruptKind::Suspend => {
                                        records.fail(
                                            &step.id,
                                            StepStatus::Suspended,
                                            "run suspended",
                                        );
                                        self.finalize_suspended(
                                            workflow,
                                            &mut state,
                                            &sink,
                                            &records,
                                            interrupt.reason,
                                            index,
                                            None,
                                        )
                                        .await
                                    }
                                });
                            }
                            attempt += 1;
                            continue;
                        }

                        records.fail(&step.id, StepStatus::Error, &message);
                        sink.emit(
                            EventDraft::new(EventKind::StepComplete, step.display_name(), "error")
                                .at_step(index)
                                .with_meta("error", json!(message)),
                        );
                        return Ok(self
                            .finalize_error(workflow, &mut state, &sink, &records, message)
                            .await);
                    }
                }
            }

            index += 1;
        }

        let rails: Vec<Arc<dyn Guardrail>> = workflow
            .output_guardrails
            .iter()
            .chain(options.output_guardrails.iter())
            .cloned()
            .collect();
        match apply_guardrails(state.data.clone(), &rails).await {
            Ok(data) => state.data = data,
            Err(error) => {
                return Ok(self
                    .finalize_error(workflow, &mut state, &sink, &records, error.to_string())
                    .await);
            }
        }

        Ok(self
            .finalize_completed(workflow, &mut state, &sink, &records)
            .await)
    }

    // -----------------------------------------------------------------------
    // Terminal transitions
    // -----------------------------------------------------------------------

    async fn finalize_completed(
        &self,
        workflow: &Workflow,
        state: &mut RunState,
        sink: &EventSink,
        records: &StepRecords,
    ) -> ExecutionResult {
        state.finish();
        sink.emit(
            EventDraft::new(EventKind::WorkflowComplete, workflow.name.clone(), "completed")
                .with_output(state.data.clone()),
        );
        tracing::info!(
            execution_id = %state.execution_id,
            workflow_id = %workflow.id,
            "workflow run completed"
        );
        self.persist(
            state.execution_id,
            StatePatch {
                status: Some(RunStatus::Completed),
                workflow_state: Some(state.workflow_state.snapshot()),
                events: Some(sink.collected()),
                output: Some(state.data.clone()),
                metadata: Some(self.run_metadata(state)),
                ..Default::default()
            },
        )
        .await;
        hooks::invoke(
            "on_finish",
            &workflow.hooks.on_finish,
            self.hook_ctx(state, records, None),
        )
        .await;
        hooks::invoke(
            "on_end",
            &workflow.hooks.on_end,
            self.hook_ctx(state, records, None),
        )
        .await;
        self.build_result(state, records, Some(state.data.clone()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize_suspended(
        &self,
        workflow: &Workflow,
        state: &mut RunState,
        sink: &EventSink,
        records: &StepRecords,
        reason: Option<String>,
        step_index: usize,
        suspend_data: Option<Value>,
    ) -> ExecutionResult {
        let mut event =
            EventDraft::new(EventKind::WorkflowSuspended, workflow.name.clone(), "suspended")
                .at_step(step_index);
        if let Some(reason) = &reason {
            event = event.with_meta("reason", json!(reason));
        }
        sink.emit(event);

        let checkpoint = state.checkpoint((0..step_index).collect());
        state.suspend(
            reason,
            step_index,
            sink.last_sequence(),
            suspend_data,
            checkpoint,
        );
        tracing::info!(
            execution_id = %state.execution_id,
            step_index,
            "workflow run suspended"
        );
        self.persist(
            state.execution_id,
            StatePatch {
                status: Some(RunStatus::Suspended),
                workflow_state: Some(state.workflow_state.snapshot()),
                suspension: Some(state.suspension.clone()),
                events: Some(sink.collected()),
                metadata: Some(self.run_metadata(state)),
                ..Default::default()
            },
        )
        .await;
        hooks::invoke(
            "on_suspend",
            &workflow.hooks.on_suspend,
            self.hook_ctx(state, records, None),
        )
        .await;
        hooks::invoke(
            "on_finish",
            &workflow.hooks.on_finish,
            self.hook_ctx(state, records, None),
        )
        .await;
        self.build_result(state, records, None)
    }

    async fn finalize_cancelled(
        &self,
        workflow: &Workflow,
        state: &mut RunState,
        sink: &EventSink,
        records: &StepRecords,
        reason: Option<String>,
    ) -> ExecutionResult {
        let mut event =
            EventDraft::new(EventKind::WorkflowCancelled, workflow.name.clone(), "cancelled");
        if let Some(reason) = &reason {
            event = event.with_meta("reason", json!(reason));
        }
        sink.emit(event);

        state.cancel(reason);
        tracing::info!(execution_id = %state.execution_id, "workflow run cancelled");
        self.persist(
            state.execution_id,
            StatePatch {
                status: Some(RunStatus::Cancelled),
                workflow_state: Some(state.workflow_state.snapshot()),
                cancellation: state.cancellation.clone(),
                events: Some(sink.collected()),
                metadata: Some(self.run_metadata(state)),
                ..Default::default()
            },
        )
        .await;
        hooks::invoke(
            "on_finish",
            &workflow.hooks.on_finish,
            self.hook_ctx(state, records, None),
        )
        .await;
        hooks::invoke(
            "on_end",
            &workflow.hooks.on_end,
            self.hook_ctx(state, records, None),
        )
        .await;
        self.build_result(state, records, None)
    }

    async fn finalize_error(
        &self,
        workflow: &Workflow,
        state: &mut RunState,
        sink: &EventSink,
        records: &StepRecords,
        message: String,
    ) -> ExecutionResult {
        sink.emit(
            EventDraft::new(EventKind::WorkflowError, workflow.name.clone(), "error")
                .with_meta("error", json!(message)),
        );
        state.fail(&message);
        tracing::error!(
            execution_id = %state.execution_id,
            error = %message,
            "workflow run failed"
        );
        self.persist(
            state.execution_id,
            StatePatch {
                status: Some(RunStatus::Error),
                workflow_state: Some(state.workflow_state.snapshot()),
                events: Some(sink.collected()),
                metadata: Some(self.run_metadata(state)),
                ..Default::default()
            },
        )
        .await;
        hooks::invoke(
            "on_error",
            &workflow.hooks.on_error,
            self.hook_ctx(state, records, None),
        )
        .await;
        hooks::invoke(
            "on_finish",
            &workflow.hooks.on_finish,
            self.hook_ctx(state, records, None),
        )
        .await;
        hooks::invoke(
            "on_end",
            &workflow.hooks.on_end,
            self.hook_ctx(state, records, None),
        )
        .await;
        self.build_result(state, records, None)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Terminal state writes are best-effort: a store failure is logged
    /// and the run's own result is still returned.
    async fn persist(&self, execution_id: Uuid, patch: StatePatch) {
        if let Err(error) = self.store.update_state(execution_id, patch).await {
            tracing::warn!(
                execution_id = %execution_id,
                error = %error,
                "terminal state write failed"
            );
        }
    }

    fn run_metadata(&self, state: &RunState) -> BTreeMap<String, Value> {
        let mut metadata = BTreeMap::new();
        if let Ok(usage) = serde_json::to_value(state.usage.total()) {
            metadata.insert("usage".to_owned(), usage);
        }
        if let Some(error) = &state.error {
            metadata.insert("error".to_owned(), json!(error));
        }
        metadata
    }

    fn hook_ctx(
        &self,
        state: &RunState,
        records: &StepRecords,
        step: Option<(&Step, usize)>,
    ) -> HookContext {
        HookContext {
            execution_id: state.execution_id,
            workflow_id: state.workflow_id.clone(),
            status: state.status,
            data: state.data.clone(),
            output: (state.status == RunStatus::Completed).then(|| state.data.clone()),
            error: state.error.clone(),
            suspension: state.suspension.clone(),
            cancellation: state.cancellation.clone(),
            usage: state.usage.total(),
            steps: records.snapshot(),
            step_id: step.map(|(s, _)| s.id.clone()),
            step_index: step.map(|(_, i)| i),
        }
    }

    fn build_result(
        &self,
        state: &RunState,
        records: &StepRecords,
        result: Option<Value>,
    ) -> ExecutionResult {
        ExecutionResult {
            execution_id: state.execution_id,
            workflow_id: state.workflow_id.clone(),
            status: state.status,
            result,
            usage: state.usage.total(),
            suspension: state.suspension.clone(),
            cancellation: state.cancellation.clone(),
            error: state.error.clone(),
            steps: records.snapshot(),
            started_at: state.started_at,
            ended_at: state.ended_at.unwrap_or_else(Utc::now),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
