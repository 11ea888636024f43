//! cbdb-adapter-couchbase - Couchbase connection lifecycle for the database secrets plugin
//!
//! Provides:
//! - Lenient decoding and validation of the mount configuration
//! - Root certificate handling for `couchbases://` clusters
//! - A lazily connecting, lock-protected [`ConnectionProducer`]
//! - An HTTP transport against the cluster management API

pub mod config;
pub mod http;
pub mod producer;
pub mod tls;
pub mod transport;
mod weak;

pub use config::{ProducerConfig, RawConfig};
pub use http::{HttpClusterConnection, HttpClusterTransport};
pub use producer::{ConnectionProducer, ProducerGuard, TYPE_NAME};
pub use tls::{SecurityConfig, TrustPool, build_security_config};
pub use transport::{ClusterConnection, ClusterTransport, ConnectOptions, TransportError};

/// Producer wired to the management API transport.
pub type CouchbaseProducer = ConnectionProducer<HttpClusterTransport>;
