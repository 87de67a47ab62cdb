//! Live event stream over a workflow run.
//!
//! [`Engine::stream`] starts the run on a background task and hands back a
//! [`WorkflowStream`]: an async iterator over the run's ordered events plus
//! the same terminal result the blocking API returns. The stream stays open
//! across a suspension so [`WorkflowStream::resume`] continues onto the
//! same event channel; it closes on any other terminal status or on
//! [`WorkflowStream::abort`].

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;
use waypoint_types::workflow::{RunStatus, WorkflowEvent};

use super::definition::Workflow;
use super::engine::{Engine, EngineError, ExecutionResult, ResumeOptions, RunOptions};
use super::store::ExecutionStore;

/// One tagged JSON object per event, newline-delimited, for chunked
/// transport.
pub fn event_chunk(event: &WorkflowEvent) -> String {
    let mut chunk = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_owned());
    chunk.push('\n');
    chunk
}

// ---------------------------------------------------------------------------
// Stream handle
// ---------------------------------------------------------------------------

pub struct WorkflowStream<S> {
    execution_id: Uuid,
    workflow: Arc<Workflow>,
    engine: Engine<S>,
    /// Keeps the channel open across suspensions; dropped on close.
    sender: Option<mpsc::UnboundedSender<WorkflowEvent>>,
    receiver: mpsc::UnboundedReceiver<WorkflowEvent>,
    handle: Option<JoinHandle<Result<ExecutionResult, EngineError>>>,
    last: Option<ExecutionResult>,
    failure: Option<String>,
}

impl<S: ExecutionStore + 'static> Engine<S> {
    /// Start a run and return its live stream.
    pub fn stream(
        &self,
        workflow: Arc<Workflow>,
        input: Value,
        mut options: RunOptions,
    ) -> WorkflowStream<S> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let execution_id = *options.execution_id.get_or_insert_with(Uuid::now_v7);

        let engine = self.clone();
        let task_workflow = workflow.clone();
        let task_sender = sender.clone();
        let handle = tokio::spawn(async move {
            engine
                .execute(&task_workflow, input, options, None, Some(task_sender))
                .await
        });

        WorkflowStream {
            execution_id,
            workflow,
            engine: self.clone(),
            sender: Some(sender),
            receiver,
            handle: Some(handle),
            last: None,
            failure: None,
        }
    }
}

impl<S: ExecutionStore + 'static> WorkflowStream<S> {
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Next event, in sequence order. Returns `None` once the stream is
    /// closed and drained; a suspended run keeps the stream open, so after
    /// the `workflow-suspended` event this waits for a resume.
    pub async fn next_event(&mut self) -> Option<WorkflowEvent> {
        loop {
            match self.handle.as_mut() {
                Some(handle) => {
                    tokio::select! {
                        event = self.receiver.recv() => return event,
                        joined = handle => {
                            self.handle = None;
                            self.absorb(joined);
                        }
                    }
                }
                None => return self.receiver.recv().await,
            }
        }
    }

    /// The events as a `futures_util::Stream`.
    pub fn events(&mut self) -> impl futures_util::Stream<Item = WorkflowEvent> + '_ {
        async_stream::stream! {
            while let Some(event) = self.next_event().await {
                yield event;
            }
        }
    }

    /// Terminal result of the current running phase.
    pub async fn result(&mut self) -> Result<ExecutionResult, EngineError> {
        if let Some(handle) = self.handle.take() {
            let joined = handle.await;
            self.absorb(joined);
        }
        if let Some(message) = &self.failure {
            return Err(EngineError::Task(message.clone()));
        }
        self.last
            .clone()
            .ok_or_else(|| EngineError::Task("no running phase".to_owned()))
    }

    /// Resume a suspended run onto this same stream.
    pub async fn resume(
        &mut self,
        resume_data: Option<Value>,
        options: ResumeOptions,
    ) -> Result<(), EngineError> {
        let last = self.result().await?;
        if last.status != RunStatus::Suspended {
            return Err(EngineError::NotSuspended {
                execution_id: self.execution_id,
                status: last.status,
            });
        }
        let sender = self
            .sender
            .clone()
            .ok_or_else(|| EngineError::Task("stream is closed".to_owned()))?;

        let engine = self.engine.clone();
        let workflow = self.workflow.clone();
        let execution_id = self.execution_id;
        self.handle = Some(tokio::spawn(async move {
            engine
                .resume_with_live(&workflow, execution_id, resume_data, options, Some(sender))
                .await
        }));
        Ok(())
    }

    /// Request suspension of the in-flight phase.
    pub fn suspend(&self, reason: Option<String>) -> Result<(), EngineError> {
        self.engine.suspend(self.execution_id, reason)
    }

    /// Request cancellation of the in-flight phase.
    pub fn cancel(&self, reason: Option<String>) -> Result<(), EngineError> {
        self.engine.cancel(self.execution_id, reason)
    }

    /// Cancel the run and close the stream immediately.
    pub fn abort(&mut self) {
        let _ = self.engine.cancel(self.execution_id, Some("aborted".to_owned()));
        self.sender = None;
    }

    /// Close the stream; buffered events remain readable until drained.
    pub fn close(&mut self) {
        self.sender = None;
    }

    fn absorb(&mut self, joined: Result<Result<ExecutionResult, EngineError>, JoinError>) {
        match joined {
            Ok(Ok(result)) => {
                // only a suspension leaves the stream open for a resume
                if result.status != RunStatus::Suspended {
                    self.sender = None;
                }
                self.last = Some(result);
            }
            Ok(Err(error)) => {
                self.sender = None;
                self.failure = Some(error.to_string());
            }
            Err(join_error) => {
                self.sender = None;
                self.failure = Some(join_error.to_string());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
