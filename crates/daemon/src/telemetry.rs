//! OpenTelemetry export (optional)
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name (default: apihub)
//!
//! # Example
//!
//! ```text
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//! OTEL_SERVICE_NAME=apihub-dev \
//!     ./apihub
//! ```

use anyhow::Result;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

pub const ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const SERVICE_NAME_VAR: &str = "OTEL_SERVICE_NAME";
const DEFAULT_SERVICE_NAME: &str = "apihub";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Flushes pending spans on drop
#[derive(Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "telemetry")]
    provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

#[cfg(feature = "telemetry")]
impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("OpenTelemetry shutdown failed: {}", e);
            }
        }
    }
}

pub fn endpoint() -> Option<String> {
    std::env::var(ENDPOINT_VAR).ok().filter(|e| !e.trim().is_empty())
}

/// True when an endpoint is configured but this build cannot export
pub fn requested_but_disabled() -> bool {
    cfg!(not(feature = "telemetry")) && endpoint().is_some()
}

#[cfg(not(feature = "telemetry"))]
pub fn layer<S>() -> Result<(Option<BoxedLayer<S>>, TelemetryGuard)>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    Ok((None, TelemetryGuard::default()))
}

/// OTLP span export layer, or None when no endpoint is configured
#[cfg(feature = "telemetry")]
pub fn layer<S>() -> Result<(Option<BoxedLayer<S>>, TelemetryGuard)>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    let Some(endpoint) = endpoint() else {
        return Ok((None, TelemetryGuard::default()));
    };
    let service_name =
        std::env::var(SERVICE_NAME_VAR).unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();
    let tracer = provider.tracer(service_name);
    let layer = tracing_opentelemetry::layer().with_tracer(tracer).boxed();

    Ok((
        Some(layer),
        TelemetryGuard {
            provider: Some(provider),
        },
    ))
}
