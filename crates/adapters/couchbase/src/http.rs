//! Cluster transport over the Couchbase management REST API
//!
//! Readiness is judged from the node list the cluster reports for
//! `/pools/default` (or a bucket under it): every node has to be `healthy`.
//! User administration for the credential collaborator goes through
//! `/settings/rbac/users/local`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::transport::{ClusterConnection, ClusterTransport, ConnectOptions, TransportError};

const MANAGEMENT_PORT: u16 = 8091;
const MANAGEMENT_TLS_PORT: u16 = 18091;
const DATA_PORT: u16 = 11210;
const DATA_TLS_PORT: u16 = 11207;

/// Parses a connection string into management endpoints.
///
/// Accepts `couchbase://h1,h2:port?opts`, `couchbases://...` and bare host
/// lists. Data-service ports are mapped onto their management counterparts;
/// `default_port` applies to hosts that carry no port.
pub fn management_endpoints(
    hosts: &str,
    default_port: Option<u16>,
) -> Result<Vec<String>, TransportError> {
    let (secure, rest) = match hosts.split_once("://") {
        Some(("couchbase", rest)) => (false, rest),
        Some(("couchbases", rest)) => (true, rest),
        Some((scheme, _)) => {
            return Err(TransportError::InvalidConnectionString(format!(
                "unsupported scheme '{}'",
                scheme
            )));
        }
        None => (false, hosts),
    };

    let (scheme, fallback_port) = if secure {
        ("https", MANAGEMENT_TLS_PORT)
    } else {
        ("http", MANAGEMENT_PORT)
    };

    let host_list = rest.split(['?', '/']).next().unwrap_or_default();

    let mut endpoints = Vec::new();
    for entry in host_list.split([',', ';']).map(str::trim).filter(|h| !h.is_empty()) {
        let (host, port) = split_host_port(entry)?;
        let port = match port.or(default_port) {
            Some(DATA_PORT) => MANAGEMENT_PORT,
            Some(DATA_TLS_PORT) => MANAGEMENT_TLS_PORT,
            Some(p) => p,
            None => fallback_port,
        };
        endpoints.push(format!("{}://{}:{}", scheme, host, port));
    }

    if endpoints.is_empty() {
        return Err(TransportError::InvalidConnectionString(
            "no hosts in connection string".to_string(),
        ));
    }

    Ok(endpoints)
}

fn split_host_port(entry: &str) -> Result<(&str, Option<u16>), TransportError> {
    let invalid = || TransportError::InvalidConnectionString(format!("invalid host '{}'", entry));

    // bracketed IPv6 literal
    if entry.starts_with('[') {
        let end = entry.find(']').ok_or_else(invalid)?;
        let host = &entry[..=end];
        return match &entry[end + 1..] {
            "" => Ok((host, None)),
            port => port
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .map(|p| (host, Some(p)))
                .ok_or_else(invalid),
        };
    }

    match entry.rsplit_once(':') {
        // IPv6 literals must be bracketed
        Some((host, _)) if host.contains(':') => Err(invalid()),
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse().map_err(|_| invalid())?;
            Ok((host, Some(port)))
        }
        Some(_) => Err(invalid()),
        None => Ok((entry, None)),
    }
}

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default)]
    nodes: Vec<NodeStatus>,
}

#[derive(Debug, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    status: String,
}

/// Opens sessions against the management REST API
#[derive(Debug, Clone)]
pub struct HttpClusterTransport {
    request_timeout: Duration,
    poll_interval: Duration,
}

impl Default for HttpClusterTransport {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl HttpClusterTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Pause between readiness probes.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn build_client(&self, options: &ConnectOptions) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .user_agent(concat!("cbdb-adapter-couchbase/", env!("CARGO_PKG_VERSION")));

        if let Some(security) = &options.security {
            builder = builder
                .tls_built_in_root_certs(false)
                .danger_accept_invalid_certs(security.skip_verify);
            for certificate in security.trust_pool.certificates() {
                builder = builder.add_root_certificate(certificate.clone());
            }
        }

        Ok(builder.build()?)
    }
}

#[async_trait]
impl ClusterTransport for HttpClusterTransport {
    type Connection = HttpClusterConnection;

    async fn connect(&self, options: &ConnectOptions) -> Result<Self::Connection, TransportError> {
        let endpoints = management_endpoints(&options.hosts, options.default_port)?;
        let client = self.build_client(options)?;

        let mut last_error = TransportError::NoReachableHost;
        for endpoint in endpoints {
            let connection = HttpClusterConnection {
                client: client.clone(),
                base_url: endpoint,
                username: options.username.clone(),
                password: options.password.clone(),
                poll_interval: self.poll_interval,
                closed: AtomicBool::new(false),
            };

            match connection.get("/pools").await {
                Ok(_) => {
                    info!(endpoint = %connection.base_url, "Connected to Couchbase cluster");
                    return Ok(connection);
                }
                Err(e) => {
                    debug!(endpoint = %connection.base_url, error = %e, "Seed node rejected connection");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

/// Authenticated session bound to one management endpoint
#[derive(Debug)]
pub struct HttpClusterConnection {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: SecretString,
    poll_interval: Duration,
    closed: AtomicBool,
}

impl HttpClusterConnection {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::AlreadyClosed);
        }
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, TransportError> {
        self.ensure_open()?;
        let response = self.authorized(self.client.get(self.url(path))).send().await?;
        Self::check(response).await
    }

    async fn all_nodes_healthy(&self, path: &str) -> Result<bool, TransportError> {
        let nodes: NodeList = self.get(path).await?.json().await?;
        for node in &nodes.nodes {
            trace!(node = %node.hostname, status = %node.status, "Node status");
        }
        Ok(!nodes.nodes.is_empty() && nodes.nodes.iter().all(|n| n.status == "healthy"))
    }

    async fn poll_until_healthy(&self, path: &str, timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let mut last_error = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.all_nodes_healthy(path)).await {
                Ok(Ok(true)) => return Ok(()),
                Ok(Ok(false)) => {
                    debug!(path, "Cluster not healthy yet");
                    last_error = Some("not every node is healthy".to_string());
                }
                Ok(Err(e)) if e.is_auth_failure() || matches!(e, TransportError::AlreadyClosed) => {
                    return Err(e);
                }
                Ok(Err(e)) => {
                    debug!(path, error = %e, "Readiness probe failed");
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    return Err(TransportError::Timeout {
                        after: timeout,
                        last_error,
                    });
                }
            }

            if Instant::now() + self.poll_interval >= deadline {
                return Err(TransportError::Timeout {
                    after: timeout,
                    last_error,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Creates or replaces a local cluster user with the given roles.
    pub async fn upsert_user(
        &self,
        username: &str,
        password: &SecretString,
        roles: &[String],
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let path = format!("/settings/rbac/users/local/{}", urlencoding::encode(username));
        let roles_value = roles.join(",");
        let form = [
            ("password", password.expose_secret().as_str()),
            ("roles", roles_value.as_str()),
        ];

        let response = self
            .authorized(self.client.put(self.url(&path)))
            .form(&form)
            .send()
            .await?;
        Self::check(response).await?;

        debug!(user = %username, roles = roles.len(), "Upserted cluster user");
        Ok(())
    }

    /// Removes a local cluster user. A user that does not exist counts as removed.
    pub async fn drop_user(&self, username: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let path = format!("/settings/rbac/users/local/{}", urlencoding::encode(username));

        let response = self
            .authorized(self.client.delete(self.url(&path)))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(user = %username, "Cluster user already absent");
            return Ok(());
        }
        Self::check(response).await?;

        debug!(user = %username, "Dropped cluster user");
        Ok(())
    }
}

#[async_trait]
impl ClusterConnection for HttpClusterConnection {
    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), TransportError> {
        self.poll_until_healthy("/pools/default", timeout).await
    }

    async fn wait_until_bucket_ready(
        &self,
        bucket: &str,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let path = format!("/pools/default/buckets/{}", urlencoding::encode(bucket));
        self.poll_until_healthy(&path, timeout).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyClosed);
        }
        debug!(endpoint = %self.base_url, "Closed Couchbase cluster connection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_scheme_defaults_to_management_port() {
        let endpoints = management_endpoints("couchbase://db1,db2", None).unwrap();
        assert_eq!(endpoints, vec!["http://db1:8091", "http://db2:8091"]);
    }

    #[test]
    fn test_secure_scheme_maps_data_ports() {
        let endpoints = management_endpoints("couchbases://a,b:11207", None).unwrap();
        assert_eq!(endpoints, vec!["https://a:18091", "https://b:18091"]);

        let endpoints = management_endpoints("couchbase://a:11210", None).unwrap();
        assert_eq!(endpoints, vec!["http://a:8091"]);
    }

    #[test]
    fn test_explicit_and_default_ports() {
        let endpoints = management_endpoints("couchbase://a:9000,b", Some(9091)).unwrap();
        assert_eq!(endpoints, vec!["http://a:9000", "http://b:9091"]);
    }

    #[test]
    fn test_default_port_is_mapped_like_explicit_ports() {
        let endpoints = management_endpoints("couchbase://a,b:9000", Some(11210)).unwrap();
        assert_eq!(endpoints, vec!["http://a:8091", "http://b:9000"]);

        let endpoints = management_endpoints("couchbases://a", Some(11207)).unwrap();
        assert_eq!(endpoints, vec!["https://a:18091"]);
    }

    #[test]
    fn test_bare_hosts_and_options_are_stripped() {
        let endpoints = management_endpoints(" a ; b ", None).unwrap();
        assert_eq!(endpoints, vec!["http://a:8091", "http://b:8091"]);

        let endpoints =
            management_endpoints("couchbase://a,b/default?network=external", None).unwrap();
        assert_eq!(endpoints, vec!["http://a:8091", "http://b:8091"]);
    }

    #[test]
    fn test_ipv6_literals() {
        let endpoints = management_endpoints("couchbase://[::1],[fe80::1]:9000", None).unwrap();
        assert_eq!(endpoints, vec!["http://[::1]:8091", "http://[fe80::1]:9000"]);
    }

    #[test]
    fn test_invalid_connection_strings() {
        for hosts in [
            "http://a",
            "couchbase://",
            "couchbase://a:port",
            "couchbase://[::1",
            ":8091",
            "couchbase://::1",
            "couchbase://fe80::1:8091",
        ] {
            assert!(
                matches!(
                    management_endpoints(hosts, None),
                    Err(TransportError::InvalidConnectionString(_))
                ),
                "{hosts}"
            );
        }
    }
}
