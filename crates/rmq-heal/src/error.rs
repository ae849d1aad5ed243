//! Central error types for rmq-heal
//!
//! Collector and remediation faults are carried as values (findings and
//! remediation records) by the cycle; only configuration and startup faults
//! escape to the binary.

use thiserror::Error;

/// Central error type for the health pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error (from reqwest)
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Kubernetes API error from kube-rs
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Socket or listener error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML rendering error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Management API answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// A collaborator call exceeded its time budget
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// The cycle was cancelled before the call completed
    #[error("{0} cancelled")]
    Cancelled(String),

    /// Every sub-fetch of a cycle failed
    #[error("Snapshot unavailable: all {failures} sub-fetches failed")]
    SnapshotUnavailable { failures: usize },

    /// Remediation action failed
    #[error("Remediation failed: {0}")]
    Remediation(String),

    /// Metrics exposition failed
    #[error("Metrics encoding error: {0}")]
    Metrics(#[from] std::fmt::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for pipeline operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Check if this error is transient and worth retrying on a later cycle
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Http(_)
            | Error::Kube(_)
            | Error::Io(_)
            | Error::Timeout { .. }
            | Error::Cancelled(_)
            | Error::SnapshotUnavailable { .. }
            | Error::Remediation(_) => true,
            Error::Status { status, .. } => *status >= 500 || *status == 429,
            Error::Serialization(_) | Error::Yaml(_) | Error::Metrics(_) | Error::Config(_) => {
                false
            }
        }
    }
}

/// One failed sub-fetch of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FetchFailure {
    /// Resource that could not be collected (e.g. `connections`, `queues:/`)
    pub resource: String,
    /// Human-readable error detail
    pub detail: String,
}

impl FetchFailure {
    pub fn new(resource: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self {
            resource: resource.into(),
            detail: detail.to_string(),
        }
    }
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.resource, self.detail)
    }
}
