//! Tracing subscriber initialization.
//!
//! Installs a structured `fmt` layer (honouring `RUST_LOG`) and, when
//! requested, bridges spans into OpenTelemetry through a stdout exporter —
//! enough for local development; production deployments swap the exporter
//! for OTLP.

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Held so the exporter can be flushed at shutdown.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// How telemetry should be emitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOptions {
    /// Bridge spans to OpenTelemetry (stdout exporter).
    pub otel: bool,
    /// Emit log lines as JSON instead of the human-readable format.
    pub json_logs: bool,
}

/// Install the global tracing subscriber.
///
/// Span close timing is included so per-step spans double as latency
/// measurements. Filtering follows `RUST_LOG` via `EnvFilter`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(options: TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::from_default_env();

    let tracer = if options.otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("waypoint");
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        Some(tracer)
    } else {
        None
    };

    // The OTel layer's subscriber type parameter is fixed by the exact
    // stack it joins, so each branch composes its own.
    if options.json_logs {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        let otel_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        let otel_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .init();
    }

    Ok(())
}

/// Flush buffered spans and shut the OTel provider down. No-op when OTel
/// was never enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(error) = provider.shutdown()
    {
        eprintln!("warning: tracer provider shutdown failed: {error}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
