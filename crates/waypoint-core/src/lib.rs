//! Waypoint: a step-execution runtime for suspendable workflows.
//!
//! Workflows are ordered step lists over a JSON payload. Runs can suspend
//! for external input and resume later from a durable checkpoint, retry
//! failing steps, cancel cooperatively, fan out with structured
//! concurrency, and emit an ordered lifecycle event stream.

pub mod workflow;
