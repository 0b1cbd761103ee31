//! Collector error taxonomy
//!
//! Lower layers work with `anyhow::Result`; everything that reaches the host
//! is folded into one of these kinds so a failed job can be classified.

use thiserror::Error;

/// Errors surfaced to the host for a single job (or at startup)
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Required configuration missing or invalid for the selected mode
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Credential resolution or token exchange failed
    #[error("authentication failed: {0:#}")]
    Authentication(#[source] anyhow::Error),

    /// Job references an endpoint that is not in the registry
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    /// The provider API call (or one page of it) failed
    #[error("{endpoint} in {region} failed: {source:#}")]
    Upstream {
        endpoint: String,
        region: String,
        #[source]
        source: anyhow::Error,
    },
}

impl CollectorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Short classification used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Authentication(_) => "authentication",
            Self::UnknownEndpoint(_) => "unknown_endpoint",
            Self::Upstream { .. } => "upstream",
        }
    }
}
