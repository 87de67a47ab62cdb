//! Composite step kinds: the only places concurrency enters a run.
//!
//! Concurrency is strictly structured: every task spawned here is a future
//! owned by the parent step's own future, so dropping the parent (signal
//! trip, first failure, race winner) cancels the children at their next
//! await point. Concurrent siblings each capture `data` as of spawn time;
//! `workflow_state` stays shared and last-writer-wins.

use futures_util::future::{select_all, try_join_all};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;

use super::definition::Workflow;
use super::step::{
    BoxedPredicate, BranchArm, ForEach, LoopMode, Step, StepContext, StepError, StepList,
    StepOutput, StepRecords,
};
use waypoint_types::workflow::StepStatus;

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// Evaluate every arm's predicate concurrently, then run every matched arm
/// concurrently. The result is a positional array with `null` at unmatched
/// arms; the first child failure propagates and drops the rest.
pub async fn run_branch(arms: &[BranchArm], ctx: StepContext) -> Result<StepOutput, StepError> {
    ctx.signal.check()?;

    let matched: Vec<bool> = try_join_all(arms.iter().map(|arm| {
        let ctx = ctx.clone();
        async move { (arm.condition)(ctx).await }
    }))
    .await?;

    let results: Vec<Value> = try_join_all(arms.iter().zip(matched).map(|(arm, hit)| {
        let ctx = ctx.clone();
        async move {
            if !hit {
                return Ok(Value::Null);
            }
            ctx.signal.check()?;
            Ok::<Value, StepError>(arm.step.execute(ctx).await?.value)
        }
    }))
    .await?;

    Ok(StepOutput::of(Value::Array(results)))
}

// ---------------------------------------------------------------------------
// ForEach
// ---------------------------------------------------------------------------

/// Bounded, order-preserving fan-out over an item array.
///
/// At most `concurrency` item futures are in flight at once, and results
/// land at their item's index regardless of completion order. The first
/// failure propagates and drops the in-flight rest.
pub async fn run_foreach(config: &ForEach, ctx: StepContext) -> Result<StepOutput, StepError> {
    ctx.signal.check()?;

    let items: Vec<Value> = match &config.items {
        Some(select) => select(ctx.clone()).await?,
        None => match &ctx.data {
            Value::Array(items) => items.clone(),
            other => {
                return Err(StepError::failed(format!(
                    "foreach expects an array payload, got {}",
                    json_kind(other)
                )));
            }
        },
    };

    let concurrency = config.concurrency.max(1);
    let results: Vec<Value> = stream::iter(items.into_iter().enumerate().map(|(index, item)| {
        let ctx = ctx.clone();
        let step = &config.step;
        let map_item = config.map_item.clone();
        async move {
            ctx.signal.check()?;
            let payload = match map_item {
                Some(map) => map(ctx.clone(), item, index).await?,
                None => item,
            };
            Ok::<Value, StepError>(step.execute(ctx.with_data(payload)).await?.value)
        }
    }))
    .buffered(concurrency)
    .try_collect()
    .await?;

    Ok(StepOutput::of(Value::Array(results)))
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Run the inner step, then the continuation predicate on its output;
/// do-while loops while the predicate holds, do-until until it does. The
/// signal is checked before each iteration and each predicate evaluation.
pub async fn run_loop(
    step: &Step,
    condition: &BoxedPredicate,
    mode: LoopMode,
    ctx: StepContext,
) -> Result<StepOutput, StepError> {
    let mut current = ctx.data.clone();
    loop {
        ctx.signal.check()?;
        current = step.execute(ctx.with_data(current)).await?.value;

        ctx.signal.check()?;
        let holds = condition(ctx.with_data(current.clone())).await?;
        let done = match mode {
            LoopMode::DoWhile => !holds,
            LoopMode::DoUntil => holds,
        };
        if done {
            return Ok(StepOutput::of(current));
        }
    }
}

// ---------------------------------------------------------------------------
// Parallel all / race
// ---------------------------------------------------------------------------

/// Run all child steps concurrently against the same payload; results join
/// positionally and the first rejection wins.
pub async fn run_all(steps: &StepList, ctx: StepContext) -> Result<StepOutput, StepError> {
    ctx.signal.check()?;

    let computed;
    let steps: &[Step] = match steps {
        StepList::Fixed(steps) => steps,
        StepList::Computed(f) => {
            computed = f(ctx.clone()).await?;
            &computed
        }
    };

    let results: Vec<Value> = try_join_all(steps.iter().map(|step| {
        let ctx = ctx.clone();
        async move {
            ctx.signal.check()?;
            Ok::<Value, StepError>(step.execute(ctx).await?.value)
        }
    }))
    .await?;

    Ok(StepOutput::of(Value::Array(results)))
}

/// First settled child wins, success or failure. The losing futures are
/// dropped when the winner settles, cancelling them at their next await
/// point.
pub async fn run_race(steps: &[Step], ctx: StepContext) -> Result<StepOutput, StepError> {
    ctx.signal.check()?;
    if steps.is_empty() {
        return Err(StepError::failed("race requires at least one child step"));
    }

    let contenders = steps
        .iter()
        .map(|step| step.execute(ctx.clone()))
        .collect::<Vec<_>>();
    let (winner, _index, _losers) = select_all(contenders).await;
    Ok(StepOutput::of(winner?.value))
}

// ---------------------------------------------------------------------------
// Embedded workflow
// ---------------------------------------------------------------------------

/// Run another workflow inline as a single step. The parent's payload is
/// the child's input; the child gets its own record namespace and its step
/// outputs are recorded there so its own map steps can see siblings.
pub async fn run_subworkflow(
    workflow: &Workflow,
    ctx: StepContext,
) -> Result<StepOutput, StepError> {
    let records = StepRecords::new();
    let child_input = ctx.data.clone();
    let mut data = child_input.clone();

    for step in &workflow.steps {
        ctx.signal.check()?;
        let child = ctx.nested(child_input.clone(), records.clone()).with_data(data);
        records.start(&step.id, child.data.clone());

        match step.execute(child).await {
            Ok(out) => {
                let status = if out.skipped {
                    StepStatus::Skipped
                } else {
                    StepStatus::Success
                };
                records.finish(&step.id, status, Some(out.value.clone()));
                data = out.value;
            }
            Err(err) => {
                let status = match &err {
                    StepError::Suspended { .. } => StepStatus::Suspended,
                    StepError::Cancelled { .. } => StepStatus::Cancelled,
                    _ => StepStatus::Error,
                };
                records.fail(&step.id, status, err.to_string());
                return Err(err);
            }
        }
    }

    Ok(StepOutput::of(data))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::event::EventSink;
    use super::super::signal::RunSignal;
    use super::super::state::{SharedState, UsageCounter};
    use super::super::step::{MapEntry, MapSource, StepKind, step_fn};
    use super::*;
    use crate::workflow::event::EventWriter;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn test_ctx(data: Value) -> StepContext {
        let sink = Arc::new(EventSink::new(Uuid::now_v7(), 0, None));
        StepContext {
            input: data.clone(),
            data,
            workflow_state: SharedState::default(),
            signal: RunSignal::new(),
            resume_data: None,
            retry_count: 0,
            records: StepRecords::new(),
            writer: EventWriter::new(sink, "test", 0),
            usage: UsageCounter::default(),
        }
    }

    fn arm(hit: bool, label: &str) -> BranchArm {
        let label = label.to_owned();
        BranchArm {
            condition: super::super::step::predicate_fn(move |_| {
                let hit = hit;
                async move { Ok(hit) }
            }),
            step: Step::func("arm", move |_| {
                let label = label.clone();
                async move { Ok(json!(label)) }
            }),
        }
    }

    #[tokio::test]
    async fn branch_leaves_nulls_at_unmatched_arms() {
        let arms = vec![arm(true, "A"), arm(false, "B"), arm(true, "C")];
        let out = run_branch(&arms, test_ctx(json!({}))).await.unwrap();
        assert_eq!(out.value, json!(["A", null, "C"]));
    }

    #[tokio::test]
    async fn branch_child_failure_propagates() {
        let failing = BranchArm {
            condition: super::super::step::predicate_fn(|_| async move { Ok(true) }),
            step: Step::func("boom", |_| async move {
                Err::<Value, _>(StepError::failed("child exploded"))
            }),
        };
        let arms = vec![arm(true, "A"), failing];
        let err = run_branch(&arms, test_ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, StepError::Failed(_)));
    }

    #[tokio::test]
    async fn foreach_preserves_input_order_despite_completion_order() {
        // decreasing delays: later items finish first
        let inner = Step::func("delayed-echo", |ctx| async move {
            let n = ctx.data.as_u64().unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(30u64.saturating_sub(n * 10))).await;
            Ok(json!(n))
        });
        let config = ForEach {
            step: Box::new(inner),
            concurrency: 3,
            items: None,
            map_item: None,
        };
        let out = run_foreach(&config, test_ctx(json!([0, 1, 2])))
            .await
            .unwrap();
        assert_eq!(out.value, json!([0, 1, 2]));
    }

    #[tokio::test]
    async fn foreach_never_exceeds_concurrency_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (flight, max) = (in_flight.clone(), peak.clone());

        let inner = Step::func("tracked", move |ctx| {
            let flight = flight.clone();
            let max = max.clone();
            async move {
                let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                flight.fetch_sub(1, Ordering::SeqCst);
                Ok(ctx.data)
            }
        });
        let config = ForEach {
            step: Box::new(inner),
            concurrency: 2,
            items: None,
            map_item: None,
        };
        run_foreach(&config, test_ctx(json!([1, 2, 3, 4, 5, 6])))
            .await
            .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn foreach_default_requires_array_payload() {
        let config = ForEach {
            step: Box::new(Step::func("echo", |ctx| async move { Ok(ctx.data) })),
            concurrency: 1,
            items: None,
            map_item: None,
        };
        let err = run_foreach(&config, test_ctx(json!({"not": "array"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Failed(_)));
    }

    #[tokio::test]
    async fn do_while_increment_from_zero_stops_at_three() {
        let inner = Step::func("inc", |ctx| async move {
            Ok(json!(ctx.data.as_i64().unwrap_or_default() + 1))
        });
        let iterations = Arc::new(AtomicUsize::new(0));
        let counted = iterations.clone();
        let condition = super::super::step::predicate_fn(move |ctx: StepContext| {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(ctx.data.as_i64().unwrap_or_default() < 3)
            }
        });

        let out = run_loop(&inner, &condition, LoopMode::DoWhile, test_ctx(json!(0)))
            .await
            .unwrap();
        assert_eq!(out.value, json!(3));
        assert_eq!(iterations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn do_until_increment_from_zero_stops_at_two() {
        let inner = Step::func("inc", |ctx| async move {
            Ok(json!(ctx.data.as_i64().unwrap_or_default() + 1))
        });
        let condition = super::super::step::predicate_fn(|ctx: StepContext| async move {
            Ok(ctx.data.as_i64().unwrap_or_default() >= 2)
        });

        let out = run_loop(&inner, &condition, LoopMode::DoUntil, test_ctx(json!(0)))
            .await
            .unwrap();
        assert_eq!(out.value, json!(2));
    }

    #[tokio::test]
    async fn all_joins_positionally_and_first_rejection_wins() {
        let steps = StepList::Fixed(vec![
            Step::func("a", |_| async move { Ok(json!("a")) }),
            Step::func("b", |_| async move { Ok(json!("b")) }),
        ]);
        let out = run_all(&steps, test_ctx(json!({}))).await.unwrap();
        assert_eq!(out.value, json!(["a", "b"]));

        let steps = StepList::Fixed(vec![
            Step::func("slow", |_| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!("slow"))
            }),
            Step::func("boom", |_| async move {
                Err::<Value, _>(StepError::failed("fast failure"))
            }),
        ]);
        let err = run_all(&steps, test_ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, StepError::Failed(msg) if msg == "fast failure"));
    }

    #[tokio::test]
    async fn all_supports_computed_step_lists() {
        let steps = StepList::Computed(Arc::new(|ctx: StepContext| {
            Box::pin(async move {
                let n = ctx.data.as_u64().unwrap_or_default();
                Ok((0..n)
                    .map(|i| Step::func(format!("gen-{i}"), move |_| async move { Ok(json!(i)) }))
                    .collect())
            })
        }));
        let out = run_all(&steps, test_ctx(json!(3))).await.unwrap();
        assert_eq!(out.value, json!([0, 1, 2]));
    }

    #[tokio::test]
    async fn race_returns_first_settled_and_drops_losers() {
        let loser_ran_to_completion = Arc::new(AtomicUsize::new(0));
        let marker = loser_ran_to_completion.clone();

        let steps = vec![
            Step::func("fast", |_| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(json!("fast"))
            }),
            Step::func("slow", move |_| {
                let marker = marker.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    marker.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("slow"))
                }
            }),
        ];
        let out = run_race(&steps, test_ctx(json!({}))).await.unwrap();
        assert_eq!(out.value, json!("fast"));
        // the loser was dropped mid-sleep, not left to finish
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(loser_ran_to_completion.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn race_with_no_children_is_an_error() {
        let err = run_race(&[], test_ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, StepError::Failed(_)));
    }

    #[tokio::test]
    async fn subworkflow_forwards_payload_and_namespaces_records() {
        let child = Workflow::new(
            "child",
            "Child",
            vec![
                Step::func("fetch", |_| async move { Ok(json!({"name": "Ada"})) }),
                Step::new(
                    "compose",
                    StepKind::Map {
                        entries: vec![MapEntry {
                            key: "name".into(),
                            source: MapSource::StepPath {
                                step_id: "fetch".into(),
                                path: "name".into(),
                            },
                        }],
                    },
                ),
            ],
        );

        let ctx = test_ctx(json!({"seed": 1}));
        // a parent-level record with a clashing id must not leak into the child
        ctx.records.start("fetch", json!("parent-scope"));

        let out = run_subworkflow(&child, ctx).await.unwrap();
        assert_eq!(out.value, json!({"name": "Ada"}));
    }

    #[tokio::test]
    async fn composite_children_observe_cancellation() {
        let inner = Step::new(
            "wait",
            StepKind::Func {
                execute: step_fn(|ctx: StepContext| async move {
                    super::super::signal::race_signal(&ctx.signal, std::future::pending::<()>())
                        .await
                        .map_err(StepError::from)?;
                    Ok(json!(null))
                }),
            },
        );
        let config = ForEach {
            step: Box::new(inner),
            concurrency: 2,
            items: None,
            map_item: None,
        };
        let ctx = test_ctx(json!([1, 2, 3]));
        let signal = ctx.signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            signal.cancel(Some("stop".into()));
        });

        let err = run_foreach(&config, ctx).await.unwrap_err();
        assert!(matches!(err, StepError::Cancelled { .. }));
    }
}
