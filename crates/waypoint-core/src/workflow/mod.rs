//! The step-execution runtime.
//!
//! This module is the engine's whole surface:
//! - `definition` -- immutable workflow definitions (steps + run policy)
//! - `step` -- the closed step-kind sum type, contexts, records
//! - `composite` -- branch/foreach/loop/parallel/subworkflow execution
//! - `signal` -- cooperative suspend/cancel with tagged interrupts
//! - `state` -- per-run mutable state and explicit status transitions
//! - `guardrail` -- input/output validators with block/rewrite outcomes
//! - `store` -- the checkpoint persistence contract + in-memory default
//! - `event` -- ordered lifecycle event emission
//! - `hooks` -- guarded lifecycle observers
//! - `engine` -- the run/resume interpreter itself
//! - `stream` -- the live event stream over a run

pub mod composite;
pub mod definition;
pub mod engine;
pub mod event;
pub mod guardrail;
pub mod hooks;
pub mod signal;
pub mod state;
pub mod step;
pub mod store;
pub mod stream;

pub use definition::Workflow;
pub use engine::{Engine, EngineError, ExecutionResult, ResumeOptions, RunOptions};
pub use guardrail::{FnGuardrail, Guardrail, GuardrailError, GuardrailOutcome};
pub use hooks::{HookContext, WorkflowHooks, hook};
pub use signal::{Interrupt, InterruptKind, RunSignal};
pub use step::{
    BranchArm, LoopMode, MapEntry, MapSource, Step, StepContext, StepError, StepKind, StepOutput,
};
pub use store::{ExecutionStore, InMemoryExecutionStore, StoreError};
pub use stream::{WorkflowStream, event_chunk};
