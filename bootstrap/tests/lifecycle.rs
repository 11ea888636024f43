//! Health reporting and shutdown wiring over a stub cluster

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cbdb_adapter_couchbase::{
    ClusterConnection, ClusterTransport, ConnectOptions, ConnectionProducer, RawConfig,
    TransportError,
};
use cbdb_bootstrap::{ShutdownController, check_producer, close_on_shutdown};
use serde_json::{Value, json};

#[derive(Clone, Default)]
struct StubTransport {
    closes: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
}

struct StubConnection {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ClusterTransport for StubTransport {
    type Connection = StubConnection;

    async fn connect(&self, options: &ConnectOptions) -> Result<StubConnection, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Other(format!(
                "refused login for {}",
                options.username
            )));
        }
        Ok(StubConnection {
            closes: Arc::clone(&self.closes),
        })
    }
}

#[async_trait]
impl ClusterConnection for StubConnection {
    async fn wait_until_ready(&self, _timeout: Duration) -> Result<(), TransportError> {
        Ok(())
    }

    async fn wait_until_bucket_ready(
        &self,
        _bucket: &str,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config() -> RawConfig {
    match json!({"hosts": "couchbase://x", "username": "vault-admin", "password": "s3cret-pw"}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_health_reports_uninitialized_producer() {
    let producer = ConnectionProducer::new(StubTransport::default());

    let health = check_producer(&producer).await;
    assert!(!health.is_healthy());
    assert_eq!(health.name, "couchbase");
    assert!(health.message.is_some());
}

#[tokio::test]
async fn test_health_connects_and_reports_healthy() {
    let producer = ConnectionProducer::new(StubTransport::default());
    producer.init(config(), false).await.unwrap();

    let health = check_producer(&producer).await;
    assert!(health.is_healthy());
    assert!(producer.lock().await.has_connection());

    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json, json!({"name": "couchbase", "status": "healthy"}));
}

#[tokio::test]
async fn test_health_redacts_failure_message() {
    let transport = StubTransport::default();
    transport.refuse.store(true, Ordering::SeqCst);
    let producer = ConnectionProducer::new(transport);
    producer.init(config(), false).await.unwrap();

    let health = check_producer(&producer).await;
    assert!(!health.is_healthy());
    let message = health.message.unwrap();
    assert!(!message.contains("vault-admin"));
    assert!(message.contains("refused login"));
}

#[tokio::test]
async fn test_shutdown_closes_producer_connection() {
    let transport = StubTransport::default();
    let producer = Arc::new(ConnectionProducer::new(transport.clone()));
    producer.init(config(), true).await.unwrap();

    let controller = ShutdownController::new();
    let task = {
        let controller = controller.clone();
        let producer = Arc::clone(&producer);
        tokio::spawn(async move { close_on_shutdown(producer, controller.wait()).await })
    };

    controller.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    assert!(!producer.lock().await.has_connection());
}

#[tokio::test]
async fn test_shutdown_before_waiting_still_closes_producer() {
    let transport = StubTransport::default();
    let producer = Arc::new(ConnectionProducer::new(transport.clone()));
    producer.init(config(), true).await.unwrap();

    let controller = ShutdownController::new();
    controller.shutdown();
    assert!(controller.is_shutdown());

    tokio::time::timeout(
        Duration::from_millis(500),
        close_on_shutdown(Arc::clone(&producer), controller.wait()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    assert!(!producer.lock().await.has_connection());
}
