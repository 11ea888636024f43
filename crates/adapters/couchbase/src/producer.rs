//! Couchbase connection producer
//!
//! Owns the mount configuration and at most one live cluster connection.
//! Every state transition happens under a single async mutex:
//!
//! - [`ConnectionProducer::init`] and [`ConnectionProducer::close`] take the lock
//!   for their whole duration, including network I/O.
//! - Resolving the connection is only possible through a [`ProducerGuard`], so
//!   the lock is always held while a caller works with the connection. Callers
//!   that need several steps to be atomic with respect to reconfiguration keep
//!   the guard for the whole operation, or use
//!   [`ConnectionProducer::with_connection`].
//!
//! The connection is created lazily on first use and cached until `close` or
//! reconfiguration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cbdb_errors::{AppError, AppResult};
use cbdb_telemetry::{CONNECTION_FAILURES, CONNECTIONS_CLOSED, CONNECTIONS_ESTABLISHED};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::{ProducerConfig, RawConfig};
use crate::tls;
use crate::transport::{ClusterConnection, ClusterTransport, ConnectOptions, TransportError};

/// Database type reported to the host.
pub const TYPE_NAME: &str = "couchbase";

/// Default bound for the readiness wait.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(5);

struct ProducerState<C> {
    config: Option<Arc<ProducerConfig>>,
    raw_config: Option<RawConfig>,
    initialized: bool,
    connection: Option<C>,
    /// Set when closing the cached connection failed; cleared by a successful `init`.
    poisoned: bool,
}

impl<C> Default for ProducerState<C> {
    fn default() -> Self {
        Self {
            config: None,
            raw_config: None,
            initialized: false,
            connection: None,
            poisoned: false,
        }
    }
}

/// Thread-safe owner of one cluster connection
pub struct ConnectionProducer<T: ClusterTransport> {
    transport: T,
    state: Mutex<ProducerState<T::Connection>>,
    /// Configuration snapshot for `secret_values`, readable without the producer lock.
    current: RwLock<Option<Arc<ProducerConfig>>>,
    readiness_timeout: Duration,
}

impl<T: ClusterTransport> ConnectionProducer<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: Mutex::new(ProducerState::default()),
            current: RwLock::new(None),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
        }
    }

    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    pub fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    pub fn readiness_timeout(&self) -> Duration {
        self.readiness_timeout
    }

    /// Acquires the producer lock.
    pub async fn lock(&self) -> ProducerGuard<'_, T> {
        ProducerGuard {
            producer: self,
            state: self.state.lock().await,
        }
    }

    /// Decodes and validates `raw`, replacing the whole producer state.
    ///
    /// The connection is not opened unless `verify_connection` is set; in that
    /// case a connection failure fails the call while the new configuration
    /// stays installed. Returns `raw` unchanged for the host to persist.
    pub async fn init(&self, raw: RawConfig, verify_connection: bool) -> AppResult<RawConfig> {
        let mut guard = self.lock().await;
        guard.configure(raw, verify_connection).await
    }

    /// Host lifecycle hook; same as [`init`](Self::init) without the saved map.
    pub async fn initialize(&self, raw: RawConfig, verify_connection: bool) -> AppResult<()> {
        self.init(raw, verify_connection).await.map(|_| ())
    }

    /// Closes the cached connection, keeping the configuration.
    ///
    /// The next connection request transparently opens a fresh one. If the
    /// transport fails to close, the handle is dropped anyway and the producer
    /// is poisoned until it is configured again.
    pub async fn close(&self) -> AppResult<()> {
        let mut guard = self.lock().await;
        guard.close_connection().await
    }

    /// Runs `operation` against the connection while holding the producer lock.
    ///
    /// The connection is created first if needed. The lock is released on every
    /// exit path, including when `operation` fails or the future is dropped.
    pub async fn with_connection<F, R>(&self, operation: F) -> AppResult<R>
    where
        F: for<'c> FnOnce(&'c T::Connection) -> BoxFuture<'c, AppResult<R>>,
    {
        let mut guard = self.lock().await;
        let connection = guard.connection().await?;
        operation(connection).await
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    /// Raw secret to placeholder table for the current configuration.
    ///
    /// Does not wait on the producer lock, so it stays responsive while a
    /// connection is being established.
    pub fn secret_values(&self) -> HashMap<String, String> {
        self.current
            .read()
            .as_ref()
            .map(|config| config.secret_values())
            .unwrap_or_default()
    }

    /// Replaces every configured secret in `text` with its placeholder.
    pub fn redact(&self, text: &str) -> String {
        let mut secrets: Vec<_> = self
            .secret_values()
            .into_iter()
            .filter(|(secret, _)| !secret.is_empty())
            .collect();
        // longest first so a secret containing another is replaced whole
        secrets.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        secrets
            .iter()
            .fold(text.to_string(), |acc, (secret, placeholder)| {
                acc.replace(secret.as_str(), placeholder)
            })
    }

    fn connection_failed(&self, phase: &'static str, context: &str, err: TransportError) -> AppError {
        metrics::counter!(CONNECTION_FAILURES, "phase" => phase).increment(1);
        let err = AppError::connection_failed(context, err);
        warn!(phase, error = %self.redact(&err.to_string()), "Couchbase connection attempt failed");
        err
    }

    async fn establish(&self, config: &ProducerConfig) -> AppResult<T::Connection> {
        let security = if config.tls {
            Some(tls::build_security_config(&config.base64pem, config.insecure_tls)?)
        } else {
            None
        };
        let options = ConnectOptions::new(config, security);
        let started = Instant::now();

        let connection = self
            .transport
            .connect(&options)
            .await
            .map_err(|e| self.connection_failed("connect", "error in connection", e))?;

        // Older servers need a bucket handle before other cluster services respond.
        let ready = match config.bucket_name.as_deref() {
            Some(bucket) => connection
                .wait_until_bucket_ready(bucket, self.readiness_timeout)
                .await
                .map_err(|e| {
                    self.connection_failed(
                        "wait_bucket",
                        "error in connection waiting for bucket",
                        e,
                    )
                }),
            None => connection
                .wait_until_ready(self.readiness_timeout)
                .await
                .map_err(|e| {
                    self.connection_failed(
                        "wait_cluster",
                        "error in connection waiting for cluster",
                        e,
                    )
                }),
        };

        if let Err(e) = ready {
            if let Err(close_err) = connection.close().await {
                warn!(error = %close_err, "Failed to release connection that never became ready");
            }
            return Err(e);
        }

        metrics::counter!(CONNECTIONS_ESTABLISHED).increment(1);
        info!(
            hosts = %config.hosts,
            bucket = config.bucket_name.as_deref().unwrap_or(""),
            tls = config.tls,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Couchbase connection established"
        );

        Ok(connection)
    }
}

/// Exclusive access to the producer state
///
/// Holding a guard blocks every other configure, connect and close on the same
/// producer until it is dropped.
pub struct ProducerGuard<'a, T: ClusterTransport> {
    producer: &'a ConnectionProducer<T>,
    state: MutexGuard<'a, ProducerState<T::Connection>>,
}

impl<'a, T: ClusterTransport> ProducerGuard<'a, T> {
    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    pub fn has_connection(&self) -> bool {
        self.state.connection.is_some()
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.poisoned
    }

    /// The raw map of the last successful configuration.
    pub fn raw_config(&self) -> Option<&RawConfig> {
        self.state.raw_config.as_ref()
    }

    /// Returns the cached connection, establishing it on a cache miss.
    ///
    /// One connection attempt per miss and no retries; a connection that fails
    /// its readiness wait is not cached.
    pub async fn connection(&mut self) -> AppResult<&T::Connection> {
        if !self.state.initialized {
            return Err(AppError::NotInitialized);
        }
        if self.state.poisoned {
            return Err(AppError::poisoned(
                "closing the previous connection failed; configure the producer again",
            ));
        }

        let connection = match self.state.connection.take() {
            Some(connection) => connection,
            None => {
                let config = self.state.config.clone().ok_or_else(|| {
                    AppError::internal("initialized producer has no configuration")
                })?;
                self.producer.establish(&config).await?
            }
        };

        Ok(self.state.connection.insert(connection))
    }

    async fn configure(&mut self, raw: RawConfig, verify_connection: bool) -> AppResult<RawConfig> {
        let config = Arc::new(ProducerConfig::from_raw(&raw)?);

        if let Some(previous) = self.state.connection.take() {
            match previous.close().await {
                Ok(()) => {
                    metrics::counter!(CONNECTIONS_CLOSED).increment(1);
                    info!("Closed previous Couchbase connection before reconfiguration");
                }
                Err(e) => warn!(
                    error = %e,
                    "Failed to close previous Couchbase connection, dropping it"
                ),
            }
        }

        *self.state = ProducerState {
            config: Some(Arc::clone(&config)),
            raw_config: Some(raw.clone()),
            initialized: true,
            connection: None,
            poisoned: false,
        };
        *self.producer.current.write() = Some(Arc::clone(&config));

        info!(
            hosts = %config.hosts,
            bucket = config.bucket_name.as_deref().unwrap_or(""),
            tls = config.tls,
            verify_connection,
            "Couchbase connection producer configured"
        );

        if verify_connection {
            self.connection()
                .await
                .map_err(|e| e.context("error verifying connection"))?;
        }

        Ok(raw)
    }

    async fn close_connection(&mut self) -> AppResult<()> {
        let Some(connection) = self.state.connection.take() else {
            return Ok(());
        };

        match connection.close().await {
            Ok(()) => {
                metrics::counter!(CONNECTIONS_CLOSED).increment(1);
                info!("Couchbase connection closed");
                Ok(())
            }
            Err(e) => {
                self.state.poisoned = true;
                error!(error = %e, "Failed to close Couchbase connection, producer poisoned");
                Err(AppError::close_failed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct NeverTransport;

    #[derive(Debug)]
    struct NeverConnection;

    #[async_trait]
    impl ClusterConnection for NeverConnection {
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
            Ok(())
        }
    }

    #[async_trait]
    impl ClusterTransport for NeverTransport {
        type Connection = NeverConnection;

        async fn connect(&self, _options: &ConnectOptions) -> Result<NeverConnection, TransportError> {
            Err(TransportError::Other("connection refused".to_string()))
        }
    }

    fn raw(value: serde_json::Value) -> RawConfig {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("test config must be an object"),
        }
    }

    #[tokio::test]
    async fn test_connection_before_init() {
        let producer = ConnectionProducer::new(NeverTransport);
        let mut guard = producer.lock().await;
        assert!(matches!(guard.connection().await, Err(AppError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_redact_replaces_credentials() {
        let producer = ConnectionProducer::new(NeverTransport);
        assert_eq!(producer.redact("nothing configured"), "nothing configured");

        producer
            .init(
                raw(json!({"hosts": "couchbase://x", "username": "admin", "password": "admin-pw"})),
                false,
            )
            .await
            .unwrap();

        assert_eq!(
            producer.redact("login admin/admin-pw refused"),
            "login [username]/[password] refused"
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_retryable_and_not_cached() {
        let producer = ConnectionProducer::new(NeverTransport);
        producer
            .init(raw(json!({"hosts": "couchbase://x", "username": "u", "password": "p"})), false)
            .await
            .unwrap();

        let mut guard = producer.lock().await;
        let err = guard.connection().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("error in connection"));
        assert!(!guard.has_connection());
    }

    #[tokio::test]
    async fn test_type_name() {
        let producer = ConnectionProducer::new(NeverTransport);
        assert_eq!(producer.type_name(), "couchbase");
        assert_eq!(producer.readiness_timeout(), Duration::from_secs(5));
    }
}
