//! Producer health reporting

use cbdb_adapter_couchbase::{ClusterTransport, ConnectionProducer};
use serde::Serialize;

/// Health of a single component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: "healthy".to_string(),
            message: None,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: "unhealthy".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Check the producer by obtaining its connection, connecting if needed.
///
/// Error messages are redacted before they are reported.
pub async fn check_producer<T: ClusterTransport>(producer: &ConnectionProducer<T>) -> ComponentHealth {
    let name = producer.type_name();
    let mut guard = producer.lock().await;

    match guard.connection().await {
        Ok(_) => ComponentHealth::healthy(name),
        Err(e) => ComponentHealth::unhealthy(name, producer.redact(&e.to_string())),
    }
}
