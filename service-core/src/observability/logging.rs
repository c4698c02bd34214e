use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, runtime, trace as sdktrace};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

fn json_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .json()
        .flatten_event(true)
}

/// Installs JSON logging plus an OTLP span exporter. Falls back to JSON
/// logging only when the exporter cannot be built.
pub fn init_tracing(service_name: &str, log_level: &str, otlp_endpoint: &str) {
    let otlp_exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(otlp_endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(otlp_exporter)
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
        ])))
        .install_batch(runtime::Tokio);

    match tracer {
        Ok(tracer) => {
            tracing_subscriber::registry()
                .with(env_filter(log_level))
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .with(json_layer())
                .init();
        }
        Err(e) => {
            init_tracing_stdout(log_level);
            tracing::warn!(
                service = service_name,
                endpoint = otlp_endpoint,
                error = %e,
                "OTLP exporter unavailable, logging to stdout only"
            );
        }
    }
}

/// JSON logging without span export, for one-shot jobs.
pub fn init_tracing_stdout(log_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(json_layer())
        .init();
}
