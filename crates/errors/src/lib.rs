//! cbdb-errors - unified error handling
//!
//! Every failure surfaced by the plugin is an [`AppError`]. Transport errors are
//! kept as the `source` so callers can still inspect the original cause.

use thiserror::Error;

/// Boxed underlying error carried by transport-level variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed configuration field. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A connection was requested before configuration succeeded.
    #[error("Not initialized: connection has not been initialized")]
    NotInitialized,

    /// Malformed or empty certificate material.
    #[error("Invalid TLS configuration: {message}")]
    InvalidTls {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Network, transport or readiness failure. Safe to retry.
    #[error("Connection failed: {context}: {source}")]
    ConnectionFailed {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Transport-level close error.
    #[error("Close failed: {source}")]
    CloseFailed {
        #[source]
        source: BoxError,
    },

    /// The producer lost track of its connection and must be reconfigured.
    #[error("Poisoned: {0}")]
    Poisoned(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_tls(msg: impl Into<String>) -> Self {
        Self::InvalidTls {
            message: msg.into(),
            source: None,
        }
    }

    pub fn invalid_tls_with_source(
        msg: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::InvalidTls {
            message: msg.into(),
            source: Some(source.into()),
        }
    }

    pub fn connection_failed(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ConnectionFailed {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn close_failed(source: impl Into<BoxError>) -> Self {
        Self::CloseFailed {
            source: source.into(),
        }
    }

    pub fn poisoned(msg: impl Into<String>) -> Self {
        Self::Poisoned(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Prepends `ctx` to the error message, keeping the variant and source intact.
    pub fn context(self, ctx: &str) -> Self {
        match self {
            Self::Validation(msg) => Self::Validation(format!("{}: {}", ctx, msg)),
            Self::InvalidTls { message, source } => Self::InvalidTls {
                message: format!("{}: {}", ctx, message),
                source,
            },
            Self::ConnectionFailed { context, source } => Self::ConnectionFailed {
                context: format!("{}: {}", ctx, context),
                source,
            },
            Self::Poisoned(msg) => Self::Poisoned(format!("{}: {}", ctx, msg)),
            Self::Internal(msg) => Self::Internal(format!("{}: {}", ctx, msg)),
            other => other,
        }
    }

    /// Only transport failures are worth another attempt; everything else
    /// needs operator or programmer intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }

    /// Stable label used in log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotInitialized => "not_initialized",
            Self::InvalidTls { .. } => "invalid_tls",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::CloseFailed { .. } => "close_failed",
            Self::Poisoned(_) => "poisoned",
            Self::Internal(_) => "internal",
        }
    }
}

/// Result type alias
pub type AppResult<T> = Result<T, AppError>;
