//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use actionflow_observe::{TracingOptions, init_tracing, shutdown_tracing};
//!
//! init_tracing(&TracingOptions::default()).unwrap();
//! // ... run ...
//! shutdown_tracing();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// Filter used when `RUST_LOG` is unset, e.g. `"warn"` or `"info,actionflow=debug"`.
    pub default_filter: String,
    /// One JSON object per event instead of human-readable lines.
    pub json: bool,
    /// Bridge spans to OpenTelemetry with a stdout exporter.
    pub enable_otel: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            json: false,
            enable_otel: false,
        }
    }
}

/// Filter from `RUST_LOG`, falling back to `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize the global tracing subscriber.
///
/// - Installs a `fmt` layer, human-readable or JSON.
/// - When `enable_otel` is true, additionally bridges tracing spans to
///   OpenTelemetry using a stdout exporter (suitable for local development;
///   swap the exporter for OTLP in production).
/// - `RUST_LOG` overrides `default_filter`.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let text_layer = (!options.json).then(|| tracing_subscriber::fmt::layer().with_target(false));
    let json_layer = options
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));

    let otel_layer = if options.enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("actionflow");

        // Store the provider for shutdown and register it globally.
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter(&options.default_filter))
        .with(text_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Safe to call even when OTel was not enabled (no-op in that case).
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}
