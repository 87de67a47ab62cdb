//! Human-in-the-loop approval flow: the run suspends at the approval step,
//! then resumes with the approver's decision.
//!
//! ```sh
//! RUST_LOG=info cargo run -p waypoint-core --example approval
//! ```

use serde_json::json;
use waypoint_core::workflow::{
    Engine, InMemoryExecutionStore, ResumeOptions, RunOptions, Step, Workflow,
};
use waypoint_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(TracingOptions::default()).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let workflow = Workflow::new(
        "order-approval",
        "Order Approval",
        vec![
            Step::func("prepare", |ctx| async move {
                Ok(json!({"order": ctx.data, "prepared": true}))
            }),
            Step::func("await-approval", |ctx| async move {
                match &ctx.resume_data {
                    Some(decision) => Ok(json!({"order": ctx.data, "approved": decision})),
                    None => Err(ctx.suspend(
                        Some("waiting for approver".into()),
                        Some(json!({"form": "approval-1"})),
                    )),
                }
            }),
            Step::func("ship", |ctx| async move { Ok(ctx.data) }),
        ],
    );

    let engine = Engine::new(InMemoryExecutionStore::new());
    let first = engine
        .run(&workflow, json!({"sku": "A-100", "qty": 2}), RunOptions::default())
        .await?;
    println!("phase 1: {:?}", first.status);
    if let Some(suspension) = &first.suspension {
        println!("suspended at step {}: {:?}", suspension.step_index, suspension.reason);
    }

    // an operator approves out of band, then the run resumes
    let second = engine
        .resume(
            &workflow,
            first.execution_id,
            Some(json!(true)),
            ResumeOptions::default(),
        )
        .await?;
    println!("phase 2: {:?}", second.status);
    println!("result: {}", second.result.unwrap_or(json!(null)));

    shutdown_tracing();
    Ok(())
}
