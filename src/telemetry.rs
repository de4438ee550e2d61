//! Logging and distributed tracing setup
//!
//! ```text
//! tracing macros ──► EnvFilter ──► fmt layer (plain | JSON) ──► stderr
//!                             └──► OpenTelemetry layer ──► OTLP (gRPC) ──► collector
//! ```
//!
//! The OpenTelemetry layer is only installed when an OTLP endpoint is
//! configured. Permission decisions are logged under the `overseer::audit`
//! target so they can be routed separately (`RUST_LOG=overseer::audit=info`).

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::TelemetryConfig;

/// Tracing target for permission audit events
pub const AUDIT_TARGET: &str = "overseer::audit";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.filter`. Fails if a global subscriber is
/// already set or the OTLP pipeline cannot be built.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), BoxError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let otel_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                    vec![
                        KeyValue::new("service.name", config.service_name.clone()),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ],
                )))
                .install_batch(runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    tracing::info!(
        service = %config.service_name,
        json = config.json,
        otlp = config.otlp_endpoint.as_deref().unwrap_or("disabled"),
        "tracing initialized"
    );

    Ok(())
}

/// Flush pending spans to the collector
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
