//! Logging and OpenTelemetry tracing setup
//!
//! Logs go to stdout (plain or JSON). Spans are additionally exported over
//! OTLP/gRPC when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::Tracer;
use opentelemetry_sdk::{runtime, Resource};
use tracing::{Level, Subscriber};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

pub const SERVICE_NAME: &str = "ncloud-lb-controller";

/// Environment variable that turns on span export
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// OTLP layer for `S`, or `None` when no collector endpoint is configured
pub fn otel_layer<S>() -> Result<Option<OpenTelemetryLayer<S, Tracer>>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let Some(endpoint) = std::env::var(OTLP_ENDPOINT_ENV).ok().filter(|e| !e.is_empty()) else {
        return Ok(None);
    };

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);
    let trace_config = opentelemetry_sdk::trace::config().with_resource(Resource::new(vec![
        KeyValue::new("service.name", SERVICE_NAME),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]));

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(trace_config)
        .install_batch(runtime::Tokio)
        .map_err(|e| Error::ConfigError(format!("failed to install OTLP tracer: {e}")))?;

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
}

/// Install the global subscriber. Returns whether span export is enabled.
///
/// The filter defaults to `INFO` and honours `RUST_LOG`.
pub fn init_telemetry(json: bool) -> Result<bool> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let otel = otel_layer()?;
    let otel_enabled = otel.is_some();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| fmt::layer().json().with_target(true)))
        .with((!json).then(|| fmt::layer().with_target(true)))
        .with(otel)
        .try_init()
        .map_err(|e| Error::ConfigError(format!("failed to install tracing subscriber: {e}")))?;

    Ok(otel_enabled)
}

/// Flush pending spans before exit
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
