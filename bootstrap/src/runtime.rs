//! Plugin runtime

use cbdb_adapter_couchbase::{CouchbaseProducer, HttpClusterTransport};
use cbdb_config::PluginConfig;
use cbdb_telemetry::{PrometheusHandle, init_metrics, init_tracing, init_tracing_json};
use tracing::{error, info, warn};

/// Initialise logging and metrics for the plugin process.
///
/// Returns the Prometheus handle for the host to render, or `None` when a
/// recorder is already installed.
pub fn init_runtime(config: &PluginConfig) -> Option<PrometheusHandle> {
    if config.json_logs() {
        init_tracing_json(&config.telemetry.log_level);
    } else {
        init_tracing(&config.telemetry.log_level);
    }

    let metrics = init_metrics()
        .inspect_err(|e| warn!(error = %e, "Metrics recorder not installed"))
        .ok();

    info!(
        plugin_name = %config.plugin_name,
        app_env = %config.app_env,
        json_logs = config.json_logs(),
        "Runtime initialized"
    );

    metrics
}

/// Producer for one mount, talking to the cluster management API.
pub fn build_producer(config: &PluginConfig) -> CouchbaseProducer {
    CouchbaseProducer::new(HttpClusterTransport::new())
        .with_readiness_timeout(config.connection.readiness_timeout())
}

/// Waits for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
