//! The step protocol: a closed set of step kinds and their execution.
//!
//! Every kind executes against a [`StepContext`] and returns a
//! [`StepOutput`] or a [`StepError`]. Suspension and cancellation are
//! ordinary variants of [`StepError`], not sentinels smuggled through
//! panics or string matching, so the engine resolves them by matching.
//! Composite kinds hold child steps and delegate to the
//! [`composite`](super::composite) module; adding a kind is a compile-time
//! exhaustiveness error everywhere the enum is matched.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;
use waypoint_types::workflow::{StepRecord, StepStatus, UsageInfo};

use super::composite;
use super::definition::Workflow;
use super::event::EventWriter;
use super::guardrail::{Guardrail, GuardrailError, apply_guardrails};
use super::signal::{Interrupt, InterruptKind, RunSignal, wait_with_signal};
use super::state::{SharedState, UsageCounter};

// ---------------------------------------------------------------------------
// Errors & output
// ---------------------------------------------------------------------------

/// How a step attempt can end short of a value.
///
/// `Suspended` and `Cancelled` are control flow, resolved by the engine to
/// the matching terminal status and never retried. `Guardrail` blocks are
/// coded policy outcomes, also never retried. Only `Failed` is subject to
/// the retry policy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    #[error("step requested suspension")]
    Suspended {
        reason: Option<String>,
        data: Option<Value>,
    },

    #[error("run cancelled")]
    Cancelled { reason: Option<String> },

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    #[error("{0}")]
    Failed(String),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }

    /// Only step-logic failures are retried.
    pub fn retryable(&self) -> bool {
        matches!(self, StepError::Failed(_))
    }
}

impl From<Interrupt> for StepError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt.kind {
            InterruptKind::Suspend => StepError::Suspended {
                reason: interrupt.reason,
                data: None,
            },
            InterruptKind::Cancel => StepError::Cancelled {
                reason: interrupt.reason,
            },
        }
    }
}

/// A step's result value, with an explicit skip marker so a conditional
/// that recomputes an identical payload is never misread as skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub value: Value,
    pub skipped: bool,
}

impl StepOutput {
    pub fn of(value: Value) -> Self {
        Self {
            value,
            skipped: false,
        }
    }

    pub fn skipped(value: Value) -> Self {
        Self {
            value,
            skipped: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Step records
// ---------------------------------------------------------------------------

/// Per-run step bookkeeping, shared with every step context so map steps
/// and hooks can read any sibling's record.
#[derive(Debug, Clone, Default)]
pub struct StepRecords {
    inner: Arc<DashMap<String, StepRecord>>,
}

impl StepRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, id: impl Into<String>, input: Value) {
        self.inner.insert(id.into(), StepRecord::running(input));
    }

    pub fn get(&self, id: &str) -> Option<StepRecord> {
        self.inner.get(id).map(|r| r.clone())
    }

    pub fn finish(&self, id: &str, status: StepStatus, output: Option<Value>) {
        if let Some(mut record) = self.inner.get_mut(id) {
            record.status = status;
            record.output = output;
        }
    }

    pub fn fail(&self, id: &str, status: StepStatus, error: impl Into<String>) {
        if let Some(mut record) = self.inner.get_mut(id) {
            record.status = status;
            record.error = Some(error.into());
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, StepRecord> {
        self.inner
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Step context
// ---------------------------------------------------------------------------

/// Everything a step sees while executing.
///
/// Cheap to clone; concurrent siblings each get a clone capturing `data`
/// as of spawn time, while `workflow_state`, `records` and `usage` stay
/// shared with the whole run.
#[derive(Clone)]
pub struct StepContext {
    /// The payload flowing into this step.
    pub data: Value,
    /// The original run input, immutable.
    pub input: Value,
    /// Shared scratch space, last-writer-wins.
    pub workflow_state: SharedState,
    /// The run's interruption signal.
    pub signal: RunSignal,
    /// Present only for the first step re-executed after a resume.
    pub resume_data: Option<Value>,
    /// Zero-based attempt counter for the current step.
    pub retry_count: u32,
    /// Sibling step records for this container.
    pub records: StepRecords,
    /// Capability for emitting custom events into the run's stream.
    pub writer: EventWriter,
    /// Run-wide usage accumulator.
    pub usage: UsageCounter,
}

impl StepContext {
    /// Request suspension of the whole run.
    ///
    /// Trips the shared signal so concurrent siblings unwind too, and
    /// returns the error the step should propagate with `return Err(...)`.
    pub fn suspend(&self, reason: Option<String>, data: Option<Value>) -> StepError {
        self.signal.suspend(reason.clone());
        StepError::Suspended { reason, data }
    }

    pub fn step_record(&self, id: &str) -> Option<StepRecord> {
        self.records.get(id)
    }

    pub fn set_workflow_state(&self, key: impl Into<String>, value: Value) {
        self.workflow_state.set(key, value);
    }

    pub fn workflow_state_value(&self, key: &str) -> Option<Value> {
        self.workflow_state.get(key)
    }

    pub fn add_usage(&self, sample: UsageInfo) {
        self.usage.add(sample);
    }

    /// Child context with a different payload; everything shared stays
    /// shared.
    pub fn with_data(&self, data: Value) -> Self {
        let mut child = self.clone();
        child.data = data;
        child
    }

    /// Context for an embedded workflow: the parent's payload becomes the
    /// child's input and the child gets an independent record namespace.
    pub fn nested(&self, input: Value, records: StepRecords) -> Self {
        let mut child = self.clone();
        child.data = input.clone();
        child.input = input;
        child.records = records;
        child.resume_data = None;
        child.retry_count = 0;
        child
    }
}

// ---------------------------------------------------------------------------
// Boxed closures
// ---------------------------------------------------------------------------

pub type BoxedStepFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<Value, StepError>> + Send + Sync>;
pub type BoxedPredicate =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<bool, StepError>> + Send + Sync>;
pub type BoxedDurationFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<Duration, StepError>> + Send + Sync>;
pub type BoxedDeadlineFn = Arc<
    dyn Fn(StepContext) -> BoxFuture<'static, Result<DateTime<Utc>, StepError>> + Send + Sync,
>;
pub type BoxedItemsFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<Vec<Value>, StepError>> + Send + Sync>;
pub type BoxedItemFn = Arc<
    dyn Fn(StepContext, Value, usize) -> BoxFuture<'static, Result<Value, StepError>>
        + Send
        + Sync,
>;
pub type BoxedStepsFn =
    Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<Vec<Step>, StepError>> + Send + Sync>;

pub fn step_fn<F, Fut>(f: F) -> BoxedStepFn
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

pub fn predicate_fn<F, Fut>(f: F) -> BoxedPredicate
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, StepError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

// ---------------------------------------------------------------------------
// Step definition
// ---------------------------------------------------------------------------

/// Immutable build-time step definition. `id` must be unique among
/// siblings; nested containers have independent id namespaces.
#[derive(Clone)]
pub struct Step {
    pub id: String,
    pub name: Option<String>,
    /// Per-step retry override; run default applies when `None`.
    pub retries: Option<u32>,
    pub kind: StepKind,
}

/// The closed set of step kinds.
#[derive(Clone)]
pub enum StepKind {
    /// Run a function; its return value becomes the next payload.
    Func { execute: BoxedStepFn },
    /// Run a function for its side effects; payload passes through.
    Tap { execute: BoxedStepFn },
    /// Run the inner step only when the predicate holds; otherwise skip
    /// with the payload unchanged.
    When {
        condition: BoxedPredicate,
        step: Box<Step>,
    },
    /// Wrap the inner step with input/output guardrail chains.
    Guardrail {
        step: Box<Step>,
        input: Vec<Arc<dyn Guardrail>>,
        output: Vec<Arc<dyn Guardrail>>,
    },
    /// Wait for a duration, racing the run signal.
    Sleep { duration: DurationSource },
    /// Wait until an instant, racing the run signal.
    SleepUntil { deadline: DeadlineSource },
    /// Evaluate all predicates concurrently, then run every matched arm
    /// concurrently; positional results with nulls at unmatched arms.
    Branch { arms: Vec<BranchArm> },
    /// Run the inner step per item through a bounded, order-preserving
    /// worker pool.
    ForEach(ForEach),
    /// Run the inner step repeatedly until the continuation predicate
    /// says stop.
    Loop {
        step: Box<Step>,
        condition: BoxedPredicate,
        mode: LoopMode,
    },
    /// Declarative field composition; entries resolve independently.
    Map { entries: Vec<MapEntry> },
    /// Run all child steps concurrently; first rejection wins.
    All { steps: StepList },
    /// First settled child wins; losers are dropped, which cancels them
    /// at their next await point.
    Race { steps: Vec<Step> },
    /// Embed another workflow as one step, forwarding the payload as its
    /// input.
    Workflow { workflow: Arc<Workflow> },
}

#[derive(Clone)]
pub enum DurationSource {
    Fixed(Duration),
    Computed(BoxedDurationFn),
}

#[derive(Clone)]
pub enum DeadlineSource {
    Fixed(DateTime<Utc>),
    Computed(BoxedDeadlineFn),
}

#[derive(Clone)]
pub struct BranchArm {
    pub condition: BoxedPredicate,
    pub step: Step,
}

#[derive(Clone)]
pub struct ForEach {
    pub step: Box<Step>,
    /// Worker pool bound; 1 means strictly sequential.
    pub concurrency: usize,
    /// Item selector; the payload itself must be an array when absent.
    pub items: Option<BoxedItemsFn>,
    /// Optional per-item payload mapping, given the item and its index.
    pub map_item: Option<BoxedItemFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Continue while the predicate holds.
    DoWhile,
    /// Continue until the predicate holds.
    DoUntil,
}

#[derive(Clone)]
pub enum StepList {
    Fixed(Vec<Step>),
    Computed(BoxedStepsFn),
}

/// One field of a map step's output object.
#[derive(Clone)]
pub struct MapEntry {
    pub key: String,
    pub source: MapSource,
}

/// Where a mapped field's value comes from. Paths are dot-separated;
/// an empty path selects the whole source value.
#[derive(Clone)]
pub enum MapSource {
    Literal(Value),
    DataPath(String),
    InputPath(String),
    StepPath { step_id: String, path: String },
    StatePath { key: String, path: String },
    Computed(BoxedStepFn),
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

impl Step {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            retries: None,
            kind,
        }
    }

    pub fn func<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        Self::new(id, StepKind::Func { execute: step_fn(f) })
    }

    pub fn tap<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        Self::new(id, StepKind::Tap { execute: step_fn(f) })
    }

    pub fn when<F, Fut>(id: impl Into<String>, condition: F, step: Step) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, StepError>> + Send + 'static,
    {
        Self::new(
            id,
            StepKind::When {
                condition: predicate_fn(condition),
                step: Box::new(step),
            },
        )
    }

    pub fn guardrail(
        id: impl Into<String>,
        step: Step,
        input: Vec<Arc<dyn Guardrail>>,
        output: Vec<Arc<dyn Guardrail>>,
    ) -> Self {
        Self::new(
            id,
            StepKind::Guardrail {
                step: Box::new(step),
                input,
                output,
            },
        )
    }

    pub fn sleep(id: impl Into<String>, duration: Duration) -> Self {
        Self::new(
            id,
            StepKind::Sleep {
                duration: DurationSource::Fixed(duration),
            },
        )
    }

    pub fn sleep_until(id: impl Into<String>, deadline: DateTime<Utc>) -> Self {
        Self::new(
            id,
            StepKind::SleepUntil {
                deadline: DeadlineSource::Fixed(deadline),
            },
        )
    }

    pub fn branch(id: impl Into<String>, arms: Vec<BranchArm>) -> Self {
        Self::new(id, StepKind::Branch { arms })
    }

    pub fn foreach(id: impl Into<String>, step: Step, concurrency: usize) -> Self {
        Self::new(
            id,
            StepKind::ForEach(ForEach {
                step: Box::new(step),
                concurrency: concurrency.max(1),
                items: None,
                map_item: None,
            }),
        )
    }

    pub fn loop_while<F, Fut>(id: impl Into<String>, step: Step, condition: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, StepError>> + Send + 'static,
    {
        Self::new(
            id,
            StepKind::Loop {
                step: Box::new(step),
                condition: predicate_fn(condition),
                mode: LoopMode::DoWhile,
            },
        )
    }

    pub fn loop_until<F, Fut>(id: impl Into<String>, step: Step, condition: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, StepError>> + Send + 'static,
    {
        Self::new(
            id,
            StepKind::Loop {
                step: Box::new(step),
                condition: predicate_fn(condition),
                mode: LoopMode::DoUntil,
            },
        )
    }

    pub fn map(id: impl Into<String>, entries: Vec<MapEntry>) -> Self {
        Self::new(id, StepKind::Map { entries })
    }

    pub fn all(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::new(
            id,
            StepKind::All {
                steps: StepList::Fixed(steps),
            },
        )
    }

    pub fn race(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::new(id, StepKind::Race { steps })
    }

    pub fn subworkflow(id: impl Into<String>, workflow: Arc<Workflow>) -> Self {
        Self::new(id, StepKind::Workflow { workflow })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            StepKind::Func { .. } => "func",
            StepKind::Tap { .. } => "tap",
            StepKind::When { .. } => "when",
            StepKind::Guardrail { .. } => "guardrail",
            StepKind::Sleep { .. } => "sleep",
            StepKind::SleepUntil { .. } => "sleep-until",
            StepKind::Branch { .. } => "branch",
            StepKind::ForEach(_) => "foreach",
            StepKind::Loop { .. } => "loop",
            StepKind::Map { .. } => "map",
            StepKind::All { .. } => "all",
            StepKind::Race { .. } => "race",
            StepKind::Workflow { .. } => "workflow",
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

impl Step {
    /// Execute this step. Boxed so composite kinds can recurse.
    pub fn execute<'a>(&'a self, ctx: StepContext) -> BoxFuture<'a, Result<StepOutput, StepError>> {
        Box::pin(async move {
            match &self.kind {
                StepKind::Func { execute } => Ok(StepOutput::of(execute(ctx).await?)),
                StepKind::Tap { execute } => {
                    let data = ctx.data.clone();
                    execute(ctx).await?;
                    Ok(StepOutput::of(data))
                }
                StepKind::When { condition, step } => {
                    if condition(ctx.clone()).await? {
                        Ok(StepOutput::of(step.execute(ctx).await?.value))
                    } else {
                        Ok(StepOutput::skipped(ctx.data))
                    }
                }
                StepKind::Guardrail {
                    step,
                    input,
                    output,
                } => {
                    let data = apply_guardrails(ctx.data.clone(), input).await?;
                    let out = step.execute(ctx.with_data(data)).await?;
                    let value = apply_guardrails(out.value, output).await?;
                    Ok(StepOutput::of(value))
                }
                StepKind::Sleep { duration } => {
                    let duration = match duration {
                        DurationSource::Fixed(d) => *d,
                        DurationSource::Computed(f) => f(ctx.clone()).await?,
                    };
                    wait_with_signal(&ctx.signal, duration).await?;
                    Ok(StepOutput::of(ctx.data))
                }
                StepKind::SleepUntil { deadline } => {
                    let deadline = match deadline {
                        DeadlineSource::Fixed(at) => *at,
                        DeadlineSource::Computed(f) => f(ctx.clone()).await?,
                    };
                    let remaining = (deadline - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    if !remaining.is_zero() {
                        wait_with_signal(&ctx.signal, remaining).await?;
                    }
                    Ok(StepOutput::of(ctx.data))
                }
                StepKind::Branch { arms } => composite::run_branch(arms, ctx).await,
                StepKind::ForEach(config) => composite::run_foreach(config, ctx).await,
                StepKind::Loop {
                    step,
                    condition,
                    mode,
                } => composite::run_loop(step, condition, *mode, ctx).await,
                StepKind::Map { entries } => resolve_map(entries, ctx).await,
                StepKind::All { steps } => composite::run_all(steps, ctx).await,
                StepKind::Race { steps } => composite::run_race(steps, ctx).await,
                StepKind::Workflow { workflow } => {
                    composite::run_subworkflow(workflow, ctx).await
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Map resolution
// ---------------------------------------------------------------------------

/// Follow a dot-separated path into a JSON value. Empty path selects the
/// whole value; any absent segment is an error.
pub(crate) fn read_path(value: &Value, path: &str) -> Result<Value, StepError> {
    if path.is_empty() {
        return Ok(value.clone());
    }
    let mut current = value;
    for part in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| {
            StepError::failed(format!("map: path '{path}' not found at segment '{part}'"))
        })?;
    }
    Ok(current.clone())
}

async fn resolve_map(entries: &[MapEntry], ctx: StepContext) -> Result<StepOutput, StepError> {
    let mut out = serde_json::Map::with_capacity(entries.len());
    for entry in entries {
        let value = match &entry.source {
            MapSource::Literal(value) => value.clone(),
            MapSource::DataPath(path) => read_path(&ctx.data, path)?,
            MapSource::InputPath(path) => read_path(&ctx.input, path)?,
            MapSource::StepPath { step_id, path } => {
                let record = ctx.records.get(step_id).ok_or_else(|| {
                    StepError::failed(format!("map: no record for step '{step_id}'"))
                })?;
                let output = record.output.ok_or_else(|| {
                    StepError::failed(format!("map: step '{step_id}' has no output yet"))
                })?;
                read_path(&output, path)?
            }
            MapSource::StatePath { key, path } => {
                let value = ctx.workflow_state.get(key).ok_or_else(|| {
                    StepError::failed(format!("map: no workflow state under '{key}'"))
                })?;
                read_path(&value, path)?
            }
            MapSource::Computed(f) => f(ctx.clone()).await?,
        };
        out.insert(entry.key.clone(), value);
    }
    Ok(StepOutput::of(Value::Object(out)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::event::EventSink;
    use super::super::guardrail::{FnGuardrail, GuardrailOutcome};
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    pub(crate) fn test_ctx(data: Value, input: Value) -> StepContext {
        let sink = Arc::new(EventSink::new(Uuid::now_v7(), 0, None));
        StepContext {
            data,
            input,
            workflow_state: SharedState::default(),
            signal: RunSignal::new(),
            resume_data: None,
            retry_count: 0,
            records: StepRecords::new(),
            writer: EventWriter::new(sink, "test", 0),
            usage: UsageCounter::default(),
        }
    }

    #[tokio::test]
    async fn func_output_becomes_payload() {
        let step = Step::func("double", |ctx| async move {
            let n = ctx.data.as_i64().unwrap_or_default();
            Ok(json!(n * 2))
        });
        let out = step.execute(test_ctx(json!(21), json!(21))).await.unwrap();
        assert_eq!(out.value, json!(42));
        assert!(!out.skipped);
    }

    #[tokio::test]
    async fn tap_passes_payload_through() {
        let step = Step::tap("log", |_| async move { Ok(json!("ignored")) });
        let out = step
            .execute(test_ctx(json!({"keep": true}), Value::Null))
            .await
            .unwrap();
        assert_eq!(out.value, json!({"keep": true}));
    }

    #[tokio::test]
    async fn when_false_skips_with_payload_unchanged() {
        let inner = Step::func("never", |_| async move { Ok(json!("ran")) });
        let step = Step::when("maybe", |_| async move { Ok(false) }, inner);
        let out = step.execute(test_ctx(json!(5), json!(5))).await.unwrap();
        assert!(out.skipped);
        assert_eq!(out.value, json!(5));
    }

    #[tokio::test]
    async fn when_true_is_not_marked_skipped_even_if_output_matches_input() {
        // recomputing an identical payload must not look like a skip
        let inner = Step::func("identity", |ctx| async move { Ok(ctx.data) });
        let step = Step::when("maybe", |_| async move { Ok(true) }, inner);
        let out = step.execute(test_ctx(json!(5), json!(5))).await.unwrap();
        assert!(!out.skipped);
        assert_eq!(out.value, json!(5));
    }

    #[tokio::test]
    async fn guardrail_step_rewrites_and_blocks() {
        let rewrite = FnGuardrail::new("upper", |v: &Value| {
            Ok(GuardrailOutcome::Replace(json!(
                v.as_str().unwrap_or_default().to_uppercase()
            )))
        });
        let inner = Step::func("identity", |ctx| async move { Ok(ctx.data) });
        let step = Step::guardrail("guarded", inner, vec![rewrite], vec![]);
        let out = step
            .execute(test_ctx(json!("hello"), Value::Null))
            .await
            .unwrap();
        assert_eq!(out.value, json!("HELLO"));

        let block = FnGuardrail::new("deny", |_: &Value| {
            Ok(GuardrailOutcome::Block {
                code: "DENIED".into(),
                message: "nope".into(),
            })
        });
        let inner = Step::func("identity", |ctx| async move { Ok(ctx.data) });
        let step = Step::guardrail("guarded", inner, vec![block], vec![]);
        let err = step
            .execute(test_ctx(json!("hello"), Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::Guardrail(GuardrailError::Blocked { .. })
        ));
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn sleep_cancelled_mid_wait_reports_cancellation() {
        let step = Step::sleep("nap", Duration::from_secs(60));
        let ctx = test_ctx(json!(1), json!(1));
        let signal = ctx.signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            signal.cancel(Some("shutdown".into()));
        });

        let err = step.execute(ctx).await.unwrap_err();
        assert!(matches!(err, StepError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn sleep_until_past_deadline_returns_immediately() {
        let step = Step::sleep_until("deadline", Utc::now() - chrono::Duration::seconds(5));
        let out = step.execute(test_ctx(json!(1), json!(1))).await.unwrap();
        assert_eq!(out.value, json!(1));
    }

    #[tokio::test]
    async fn map_composes_from_all_sources() {
        let ctx = test_ctx(json!({"userId": "u1"}), json!({"orderId": "o9"}));
        ctx.records.start("fetch-user", json!({}));
        ctx.records
            .finish("fetch-user", StepStatus::Success, Some(json!({"name": "Ada"})));

        let step = Step::map(
            "compose",
            vec![
                MapEntry {
                    key: "user".into(),
                    source: MapSource::DataPath("userId".into()),
                },
                MapEntry {
                    key: "order".into(),
                    source: MapSource::InputPath("orderId".into()),
                },
                MapEntry {
                    key: "name".into(),
                    source: MapSource::StepPath {
                        step_id: "fetch-user".into(),
                        path: "name".into(),
                    },
                },
                MapEntry {
                    key: "version".into(),
                    source: MapSource::Literal(json!(2)),
                },
            ],
        );

        let out = step.execute(ctx).await.unwrap();
        assert_eq!(
            out.value,
            json!({"user": "u1", "order": "o9", "name": "Ada", "version": 2})
        );
    }

    #[tokio::test]
    async fn map_missing_path_is_an_error() {
        let step = Step::map(
            "compose",
            vec![MapEntry {
                key: "missing".into(),
                source: MapSource::DataPath("no.such.path".into()),
            }],
        );
        let err = step
            .execute(test_ctx(json!({"other": 1}), Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Failed(_)));
    }

    #[test]
    fn read_path_indexes_arrays() {
        let value = json!({"items": [{"sku": "a"}, {"sku": "b"}]});
        assert_eq!(read_path(&value, "items.1.sku").unwrap(), json!("b"));
        assert!(read_path(&value, "items.9.sku").is_err());
    }

    #[test]
    fn context_suspend_trips_shared_signal() {
        let ctx = test_ctx(json!(1), json!(1));
        let err = ctx.suspend(Some("need input".into()), Some(json!({"form": "f1"})));
        assert!(matches!(err, StepError::Suspended { .. }));
        assert!(ctx.signal.is_triggered());
    }
}
