//! Observability setup for Waypoint.
//!
//! The engine emits structured `tracing` spans and events; this crate owns
//! subscriber initialization and the optional OpenTelemetry bridge so
//! binaries configure telemetry in one place.

pub mod tracing_setup;
