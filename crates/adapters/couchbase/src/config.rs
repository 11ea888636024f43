//! Couchbase mount configuration
//!
//! Decoded from the raw map the host hands to `init`. The map itself is kept
//! verbatim by the producer so the host can persist it.

use std::collections::HashMap;

use cbdb_errors::{AppError, AppResult};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::weak;

/// Loosely typed configuration as received from the host.
pub type RawConfig = serde_json::Map<String, Value>;

/// Scheme a TLS-enabled `hosts` value has to use.
pub const SECURE_SCHEME: &str = "couchbases://";

pub const USERNAME_PLACEHOLDER: &str = "[username]";
pub const PASSWORD_PLACEHOLDER: &str = "[password]";

/// Validated connection settings of one mount
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Connection string listing the cluster seed nodes
    pub hosts: String,
    /// Management port used for seed nodes that carry no explicit port
    pub port: Option<u16>,
    pub username: String,
    pub password: SecretString,
    /// Bucket to scope the readiness wait to; `None` waits on the whole cluster
    pub bucket_name: Option<String>,
    pub tls: bool,
    pub insecure_tls: bool,
    /// Base64 encoded PEM bundle of trusted root certificates
    pub base64pem: String,
}

/// Exact key first, then the first key that matches ignoring ASCII case.
fn lookup<'a>(raw: &'a RawConfig, key: &str) -> Option<&'a Value> {
    raw.get(key).or_else(|| {
        raw.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn string_field(raw: &RawConfig, key: &str) -> AppResult<String> {
    lookup(raw, key).map_or(Ok(String::new()), |v| weak::string(key, v))
}

fn bool_field(raw: &RawConfig, key: &str) -> AppResult<bool> {
    lookup(raw, key).map_or(Ok(false), |v| weak::boolean(key, v))
}

fn port_field(raw: &RawConfig, key: &str) -> AppResult<Option<u16>> {
    let port = lookup(raw, key).map_or(Ok(0), |v| weak::integer(key, v))?;
    match port {
        0 => Ok(None),
        p => u16::try_from(p)
            .map(Some)
            .map_err(|_| AppError::validation(format!("{} {} is out of range", key, p))),
    }
}

impl ProducerConfig {
    /// Weakly decodes the recognised keys. Unknown keys are ignored.
    pub fn decode(raw: &RawConfig) -> AppResult<Self> {
        let bucket_name = string_field(raw, "bucket_name")?;

        Ok(Self {
            hosts: string_field(raw, "hosts")?,
            port: port_field(raw, "port")?,
            username: string_field(raw, "username")?,
            password: SecretString::new(string_field(raw, "password")?),
            bucket_name: (!bucket_name.is_empty()).then_some(bucket_name),
            tls: bool_field(raw, "tls")?,
            insecure_tls: bool_field(raw, "insecure_tls")?,
            base64pem: string_field(raw, "base64pem")?,
        })
    }

    /// Checks run in a fixed order and stop at the first violation.
    pub fn validate(&self) -> AppResult<()> {
        if self.hosts.is_empty() {
            return Err(AppError::validation("hosts cannot be empty"));
        }
        if self.username.is_empty() {
            return Err(AppError::validation("username cannot be empty"));
        }
        if self.password.expose_secret().is_empty() {
            return Err(AppError::validation("password cannot be empty"));
        }

        if self.tls {
            if self.base64pem.is_empty() {
                return Err(AppError::validation("base64pem cannot be empty"));
            }
            if !self.hosts.starts_with(SECURE_SCHEME) {
                return Err(AppError::validation(format!(
                    "hosts list must start with {} for TLS connection",
                    SECURE_SCHEME
                )));
            }
        }

        Ok(())
    }

    /// Decode and validate in one step.
    pub fn from_raw(raw: &RawConfig) -> AppResult<Self> {
        let config = Self::decode(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Raw secret to placeholder, for scrubbing text before it leaves the plugin.
    pub fn secret_values(&self) -> HashMap<String, String> {
        let mut values = HashMap::with_capacity(2);
        values.insert(
            self.password.expose_secret().clone(),
            PASSWORD_PLACEHOLDER.to_string(),
        );
        values.insert(self.username.clone(), USERNAME_PLACEHOLDER.to_string());
        values
    }
}
