//! Graceful Shutdown

use std::future::Future;
use std::sync::Arc;

use cbdb_adapter_couchbase::{ClusterTransport, ConnectionProducer};
use cbdb_errors::AppResult;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown controller shared between the signal task and mounted producers.
///
/// Once triggered it stays triggered: waiters that start late resolve at once.
#[derive(Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        info!("Triggering shutdown");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn wait(&self) -> impl Future<Output = ()> + Send + '_ {
        self.token.cancelled()
    }

    /// Token for tasks that select on shutdown themselves.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Release the producer's connection once `signal` resolves.
pub async fn close_on_shutdown<T, S>(producer: Arc<ConnectionProducer<T>>, signal: S) -> AppResult<()>
where
    T: ClusterTransport,
    S: Future<Output = ()> + Send,
{
    signal.await;
    info!(plugin = producer.type_name(), "Closing producer");

    producer.close().await.inspect_err(|e| {
        warn!(error = %producer.redact(&e.to_string()), "Producer did not close cleanly");
    })
}
