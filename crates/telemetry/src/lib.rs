//! telemetry - logging and metrics bootstrap for the plugin process

pub use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Counter: connections that passed the readiness wait.
pub const CONNECTIONS_ESTABLISHED: &str = "couchbase_connections_established_total";
/// Counter: failed establishment attempts, labelled by `phase`.
pub const CONNECTION_FAILURES: &str = "couchbase_connection_failures_total";
/// Counter: cached connections released through close or reconfiguration.
pub const CONNECTIONS_CLOSED: &str = "couchbase_connections_closed_total";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),

    #[error("Failed to install Prometheus recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// Installs a human readable subscriber. `RUST_LOG` overrides `log_level`.
pub fn try_init_tracing(log_level: &str) -> Result<(), TelemetryError> {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

/// Installs a JSON subscriber for production hosts.
pub fn try_init_tracing_json(log_level: &str) -> Result<(), TelemetryError> {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()?;
    Ok(())
}

/// Like [`try_init_tracing`], but a subscriber that is already installed is left in place.
pub fn init_tracing(log_level: &str) {
    if let Err(e) = try_init_tracing(log_level) {
        tracing::debug!(error = %e, "Tracing already initialized");
    }
}

pub fn init_tracing_json(log_level: &str) {
    if let Err(e) = try_init_tracing_json(log_level) {
        tracing::debug!(error = %e, "Tracing already initialized");
    }
}

/// Installs the Prometheus recorder and describes the producer counters.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!(
        CONNECTIONS_ESTABLISHED,
        "Cluster connections established and verified ready"
    );
    metrics::describe_counter!(
        CONNECTION_FAILURES,
        "Cluster connection attempts that failed, by phase"
    );
    metrics::describe_counter!(CONNECTIONS_CLOSED, "Cached cluster connections released");

    Ok(handle)
}
