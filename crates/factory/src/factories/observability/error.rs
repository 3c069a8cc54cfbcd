use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObservabilityError {
    #[error("Failed to build OTLP exporter, {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),
    #[error("Failed to install tracing subscriber, {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
