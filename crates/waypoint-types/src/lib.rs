//! Shared domain types for Waypoint.
//!
//! Everything that crosses a crate boundary or a persistence boundary lives
//! here: run/step statuses, retry policy, checkpoints, suspension and
//! cancellation metadata, lifecycle events, and the durable execution record.

pub mod workflow;
