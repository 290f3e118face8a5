//! # mesh-core
//!
//! Core types, traits, and configuration for the inference mesh orchestrator.
//!
//! This crate provides the data structures shared by the transport and
//! orchestrator crates:
//!
//! - Node configuration and request/response types
//! - Live per-node metrics and the stats snapshot
//! - The [`NodeTransport`] and [`ProcessRestarter`] collaborator traits
//! - Configuration schema, layered loading and validation
//! - The error taxonomy

pub mod config;
pub mod error;
pub mod state;
pub mod traits;
pub mod types;

// Re-export commonly used types at the crate root
pub use config::{LoggingConfig, OrchestratorConfig, ScoringWeights};
pub use error::{Error, Result};
pub use state::{LatencyWindow, NodeMetrics, NodeStatsView};
pub use traits::{NodeTransport, ProcessRestarter};
pub use types::{
    GenerateRequest, GenerateResult, HealthReport, InferenceNode, NodeStatus, ProcessConfig,
    SshConfig, TransportKind,
};
