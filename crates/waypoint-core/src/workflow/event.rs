//! Ordered lifecycle event emission.
//!
//! Every run owns one [`EventSink`]. Emission assigns a strictly increasing
//! sequence number, appends to the collected log that gets persisted with
//! the execution record, and fans out to an optional live channel backing
//! the streaming API. A resumed run seeds the sequence from the suspension
//! metadata so ordering is preserved across the gap.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;
use waypoint_types::workflow::{EventKind, WorkflowEvent};

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Per-run event sink: sequencing, collection, optional live fan-out.
#[derive(Debug)]
pub struct EventSink {
    execution_id: Uuid,
    last_sequence: AtomicU64,
    collected: Mutex<Vec<WorkflowEvent>>,
    live: Option<mpsc::UnboundedSender<WorkflowEvent>>,
}

/// Everything an emitter provides; the sink fills in id, sequence and
/// timestamp.
#[derive(Debug, Default)]
pub struct EventDraft {
    pub kind: Option<EventKind>,
    pub from: String,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub status: String,
    pub step_index: Option<usize>,
    pub metadata: BTreeMap<String, Value>,
}

impl EventDraft {
    pub fn new(kind: EventKind, from: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            from: from.into(),
            status: status.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn at_step(mut self, index: usize) -> Self {
        self.step_index = Some(index);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl EventSink {
    /// `start_sequence` is 0 for a fresh run, or the suspended run's last
    /// event sequence on resume.
    pub fn new(
        execution_id: Uuid,
        start_sequence: u64,
        live: Option<mpsc::UnboundedSender<WorkflowEvent>>,
    ) -> Self {
        Self {
            execution_id,
            last_sequence: AtomicU64::new(start_sequence),
            collected: Mutex::new(Vec::new()),
            live,
        }
    }

    /// Emit one event; returns its sequence number.
    pub fn emit(&self, draft: EventDraft) -> u64 {
        let sequence = self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = WorkflowEvent {
            kind: draft.kind.unwrap_or(EventKind::StepOutput),
            execution_id: self.execution_id,
            from: draft.from,
            input: draft.input,
            output: draft.output,
            status: draft.status,
            timestamp: Utc::now(),
            step_index: draft.step_index,
            sequence,
            metadata: draft.metadata,
        };

        self.collected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        if let Some(live) = &self.live {
            // Receiver gone means nobody is streaming; collection still works.
            let _ = live.send(event);
        }
        sequence
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::SeqCst)
    }

    /// Events emitted in this running phase, in order.
    pub fn collected(&self) -> Vec<WorkflowEvent> {
        self.collected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Step writer
// ---------------------------------------------------------------------------

/// Step-scoped capability for emitting custom events into the run's stream.
///
/// Writer events are tagged `step-output` with the step's name and index
/// pre-filled and participate in the same sequence as engine events.
#[derive(Clone)]
pub struct EventWriter {
    sink: std::sync::Arc<EventSink>,
    step_name: String,
    step_index: usize,
}

impl EventWriter {
    pub fn new(sink: std::sync::Arc<EventSink>, step_name: impl Into<String>, step_index: usize) -> Self {
        Self {
            sink,
            step_name: step_name.into(),
            step_index,
        }
    }

    /// Emit a custom event carrying `payload` as its output.
    pub fn write(&self, payload: Value) -> u64 {
        self.sink.emit(
            EventDraft::new(EventKind::StepOutput, self.step_name.clone(), "running")
                .with_output(payload)
                .at_step(self.step_index),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequences_are_strictly_increasing() {
        let sink = EventSink::new(Uuid::now_v7(), 0, None);
        let a = sink.emit(EventDraft::new(EventKind::WorkflowStart, "flow", "running"));
        let b = sink.emit(EventDraft::new(EventKind::StepStart, "step-a", "running").at_step(0));
        let c = sink.emit(EventDraft::new(EventKind::StepComplete, "step-a", "success").at_step(0));
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(sink.last_sequence(), 3);

        let collected = sink.collected();
        assert_eq!(collected.len(), 3);
        assert!(collected.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn resume_continues_sequence_after_gap() {
        let sink = EventSink::new(Uuid::now_v7(), 7, None);
        let seq = sink.emit(EventDraft::new(EventKind::StepStart, "step-b", "running"));
        assert_eq!(seq, 8);
    }

    #[test]
    fn live_channel_receives_emitted_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Uuid::now_v7(), 0, Some(tx));
        sink.emit(
            EventDraft::new(EventKind::WorkflowStart, "flow", "running")
                .with_input(json!({"n": 1})),
        );

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::WorkflowStart);
        assert_eq!(event.input, Some(json!({"n": 1})));
    }

    #[test]
    fn writer_emits_step_output_events() {
        let sink = std::sync::Arc::new(EventSink::new(Uuid::now_v7(), 0, None));
        let writer = EventWriter::new(sink.clone(), "notify", 3);
        writer.write(json!({"progress": 0.5}));

        let events = sink.collected();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::StepOutput);
        assert_eq!(events[0].from, "notify");
        assert_eq!(events[0].step_index, Some(3));
        assert_eq!(events[0].output, Some(json!({"progress": 0.5})));
    }
}
