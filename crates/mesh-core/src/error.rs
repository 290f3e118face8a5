//! Error handling for the inference mesh
//!
//! Only [`Error::AllNodesFailed`] and [`Error::NoNodesAvailable`] are ever
//! returned from the orchestrator's `generate()`. Every other kind is produced
//! inside probes, dispatch attempts or recovery actions and is absorbed into a
//! metrics update before it can reach a caller.

/// Result type alias for mesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the inference mesh
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Health probe did not complete within the probe timeout
    #[error("Probe timed out: {0}")]
    ProbeTimeout(String),

    /// Health probe could not reach the node or got a non-success reply
    #[error("Probe failed, node unreachable: {0}")]
    ProbeUnreachable(String),

    /// Node is degraded and not eligible under the current selection policy
    #[error("Node degraded: {0}")]
    NodeDegraded(String),

    /// Node is offline or otherwise excluded from selection
    #[error("Node unavailable: {0}")]
    NodeUnavailable(String),

    /// A single generate attempt against one node failed
    #[error("Generation attempt on node {node} failed: {reason}")]
    GenerationAttemptFailed { node: String, reason: String },

    /// Every attempt of a generate call failed
    #[error("All nodes failed after {attempts} attempt(s), last error: {last_error}")]
    AllNodesFailed { attempts: u32, last_error: String },

    /// No node was eligible at selection time
    #[error("No nodes available")]
    NoNodesAvailable,

    /// The local process restart action reported a failure
    #[error("Recovery action failed: {0}")]
    RecoveryActionFailed(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Layered configuration loading errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a probe timeout error
    pub fn probe_timeout(msg: impl Into<String>) -> Self {
        Self::ProbeTimeout(msg.into())
    }

    /// Create a probe unreachable error
    pub fn probe_unreachable(msg: impl Into<String>) -> Self {
        Self::ProbeUnreachable(msg.into())
    }

    /// Create a per-attempt generation failure
    pub fn attempt_failed(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GenerationAttemptFailed {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Create a recovery action failure
    pub fn recovery_failed(msg: impl Into<String>) -> Self {
        Self::RecoveryActionFailed(msg.into())
    }

    /// Hard errors are the only kinds allowed to cross the orchestrator boundary
    pub fn is_hard(&self) -> bool {
        matches!(self, Error::AllNodesFailed { .. } | Error::NoNodesAvailable)
    }

    /// Check if this error should trigger a retry on a different node
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::GenerationAttemptFailed { .. }
                | Error::NodeDegraded(_)
                | Error::NodeUnavailable(_)
                | Error::ProbeTimeout(_)
                | Error::ProbeUnreachable(_)
        )
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::ProbeTimeout(_) => "probe_timeout",
            Error::ProbeUnreachable(_) => "probe_unreachable",
            Error::NodeDegraded(_) => "node_degraded",
            Error::NodeUnavailable(_) => "node_unavailable",
            Error::GenerationAttemptFailed { .. } => "attempt_failed",
            Error::AllNodesFailed { .. } => "all_nodes_failed",
            Error::NoNodesAvailable => "no_nodes_available",
            Error::RecoveryActionFailed(_) => "recovery_failed",
            Error::InvalidConfiguration(_) => "configuration",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }
}
