//! Collaborator traits
//!
//! The orchestrator never talks to a node or a local process directly. Node
//! I/O goes through a [`NodeTransport`] and restarts through a
//! [`ProcessRestarter`], so selection and dispatch logic stay independent of
//! how a node is reached.

use crate::{GenerateRequest, HealthReport, InferenceNode, Result, TransportKind};
use async_trait::async_trait;
use std::time::Duration;

/// Network access to a single inference node
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Transport kind, for logs and stats
    fn kind(&self) -> TransportKind;

    /// Lightweight reachability check.
    ///
    /// Must return within `timeout`; a late reply is reported as
    /// [`Error::ProbeTimeout`](crate::Error::ProbeTimeout), anything else that
    /// is not a success as [`Error::ProbeUnreachable`](crate::Error::ProbeUnreachable).
    async fn health(&self, timeout: Duration) -> Result<HealthReport>;

    /// Run one generate attempt and return the produced text.
    ///
    /// Every failure, including the timeout, is reported as
    /// [`Error::GenerationAttemptFailed`](crate::Error::GenerationAttemptFailed).
    async fn generate(&self, request: &GenerateRequest, timeout: Duration) -> Result<String>;
}

/// Restarts the local process behind a locally-managed node
#[async_trait]
pub trait ProcessRestarter: Send + Sync {
    async fn restart(&self, node: &InferenceNode) -> Result<()>;
}
