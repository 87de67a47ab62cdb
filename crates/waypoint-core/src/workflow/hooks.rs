//! Lifecycle hooks.
//!
//! Hooks observe the run; they never steer it. Each invocation is guarded
//! independently: a hook error is logged and swallowed so a misbehaving
//! observer can neither change the terminal status nor stop the remaining
//! hooks from firing.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;
use waypoint_types::workflow::{
    CancellationMetadata, RunStatus, StepRecord, SuspensionMetadata, UsageInfo,
};

/// Snapshot handed to a hook at the moment it fires.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub status: RunStatus,
    /// The data payload at hook time.
    pub data: Value,
    /// Final output, present for `on_finish` of a completed run.
    pub output: Option<Value>,
    pub error: Option<String>,
    pub suspension: Option<SuspensionMetadata>,
    pub cancellation: Option<CancellationMetadata>,
    pub usage: UsageInfo,
    pub steps: BTreeMap<String, StepRecord>,
    /// Set for step-scoped hooks.
    pub step_id: Option<String>,
    pub step_index: Option<usize>,
}

pub type Hook = Arc<dyn Fn(HookContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Box an async closure as a hook.
pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Observer set for a workflow. All optional; defaults observe nothing.
#[derive(Clone, Default)]
pub struct WorkflowHooks {
    pub on_step_start: Option<Hook>,
    pub on_step_end: Option<Hook>,
    pub on_suspend: Option<Hook>,
    pub on_error: Option<Hook>,
    pub on_finish: Option<Hook>,
    pub on_end: Option<Hook>,
}

/// Run one hook, swallowing and logging any failure.
pub(crate) async fn invoke(name: &'static str, slot: &Option<Hook>, ctx: HookContext) {
    let Some(hook) = slot else { return };
    let execution_id = ctx.execution_id;
    if let Err(error) = hook(ctx).await {
        tracing::warn!(
            hook = name,
            execution_id = %execution_id,
            error = %error,
            "lifecycle hook failed; continuing"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> HookContext {
        HookContext {
            execution_id: Uuid::now_v7(),
            workflow_id: "flow".into(),
            status: RunStatus::Completed,
            data: json!({}),
            output: None,
            error: None,
            suspension: None,
            cancellation: None,
            usage: UsageInfo::default(),
            steps: BTreeMap::new(),
            step_id: None,
            step_index: None,
        }
    }

    #[tokio::test]
    async fn failing_hook_is_swallowed() {
        let slot = Some(hook(|_| async { anyhow::bail!("observer exploded") }));
        // must not panic or propagate
        invoke("on_finish", &slot, ctx()).await;
    }

    #[tokio::test]
    async fn absent_hook_is_a_noop() {
        invoke("on_end", &None, ctx()).await;
    }

    #[tokio::test]
    async fn hook_sees_the_snapshot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let slot = Some(hook(move |ctx| {
            let seen = seen.clone();
            async move {
                assert_eq!(ctx.status, RunStatus::Completed);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        invoke("on_finish", &slot, ctx()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
