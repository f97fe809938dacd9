use crate::{config::ConfigError, frontier::SkippedRange, retry::Role};
use thiserror::Error;

/// Failure of a single request against an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Other(String),
}

impl EndpointError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{role} aborted after {attempts} attempt(s): {source}")]
    Aborted {
        role: Role,
        attempts: u32,
        #[source]
        source: EndpointError,
    },
    #[error("{role} exhausted {max_retries} retries ({attempts} attempt(s)): {source}")]
    ExhaustedRetries {
        role: Role,
        attempts: u32,
        max_retries: u32,
        #[source]
        source: EndpointError,
    },
    #[error("migration completed with {} skipped range(s), data has gaps", skipped.len())]
    Partial { skipped: Vec<SkippedRange> },
    #[error("migration cancelled")]
    Cancelled,
    #[error("worker failed: {0}")]
    Worker(String),
}

impl MigrationError {
    /// Short machine-readable classification used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::Aborted { .. } => "aborted",
            Self::ExhaustedRetries { .. } => "exhausted_retries",
            Self::Partial { .. } => "partial",
            Self::Cancelled => "cancelled",
            Self::Worker(_) => "internal",
        }
    }

    /// Whether rerunning the same migration may succeed.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Aborted { .. } | Self::ExhaustedRetries { .. } | Self::Cancelled
        )
    }
}
