//! Seam between the producer and whatever actually talks to the cluster

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

use crate::config::ProducerConfig;
use crate::tls::SecurityConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Readiness deadline passed; carries the last probe failure, if any.
    #[error("not ready after {after:?}{}", last_error_suffix(.last_error))]
    Timeout {
        after: Duration,
        last_error: Option<String>,
    },

    #[error("no seed node could be reached")]
    NoReachableHost,

    #[error("connection already closed")]
    AlreadyClosed,

    #[error("{0}")]
    Other(String),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_deref()
        .map(|e| format!(" (last error: {})", e))
        .unwrap_or_default()
}

impl TransportError {
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after,
            last_error: None,
        }
    }

    /// Credentials were rejected; polling again cannot help.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::UnexpectedStatus { status: 401 | 403, .. })
    }
}

/// Everything a transport needs to open an authenticated session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub hosts: String,
    pub default_port: Option<u16>,
    pub username: String,
    pub password: SecretString,
    /// `None` when TLS is disabled.
    pub security: Option<SecurityConfig>,
}

impl ConnectOptions {
    pub fn new(config: &ProducerConfig, security: Option<SecurityConfig>) -> Self {
        Self {
            hosts: config.hosts.clone(),
            default_port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            security,
        }
    }
}

/// Opens cluster sessions.
#[async_trait]
pub trait ClusterTransport: Send + Sync + 'static {
    type Connection: ClusterConnection;

    /// Opens an authenticated session. Must not retry internally.
    async fn connect(&self, options: &ConnectOptions) -> Result<Self::Connection, TransportError>;
}

/// An established session to the cluster.
#[async_trait]
pub trait ClusterConnection: Send + Sync + 'static {
    /// Waits until every cluster service is reachable.
    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), TransportError>;

    /// Waits until `bucket` is open and served by every node.
    async fn wait_until_bucket_ready(
        &self,
        bucket: &str,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: ClusterTransport> ClusterTransport for Arc<T> {
    type Connection = T::Connection;

    async fn connect(&self, options: &ConnectOptions) -> Result<Self::Connection, TransportError> {
        (**self).connect(options).await
    }
}
