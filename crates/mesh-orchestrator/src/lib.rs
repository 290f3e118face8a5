//! # mesh-orchestrator
//!
//! Health-aware, load-scoring request orchestration across heterogeneous
//! inference nodes.
//!
//! This crate provides:
//! - A fixed node registry with per-node live metrics
//! - A concurrent, cancellable health probe loop
//! - Load scoring and deterministic node selection
//! - Request dispatch with failover to a different node on failure
//! - Rate-limited restarts of locally-managed node processes
//! - Prometheus metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_core::{GenerateRequest, OrchestratorConfig};
//! use mesh_orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OrchestratorConfig::load(Some("mesh.yaml".as_ref()))?;
//!     let orchestrator = Orchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     let result = orchestrator
//!         .generate(GenerateRequest::new("llama3", "Why is the sky blue?"))
//!         .await?;
//!     println!("{} answered after {} retries", result.node_used, result.retry_count);
//!
//!     orchestrator.stop().await;
//!     Ok(())
//! }
//! ```

pub mod dispatcher;
pub mod metrics;
pub mod orchestrator;
pub mod probe;
pub mod recovery;
pub mod registry;
pub mod scoring;
pub mod selector;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export main types
pub use metrics::OrchestratorMetrics;
pub use orchestrator::Orchestrator;
pub use registry::{NodeEntry, NodeRegistry};
pub use scoring::LoadScorer;
pub use selector::Selector;

pub use mesh_core::{
    Error, GenerateRequest, GenerateResult, NodeStatsView, NodeStatus, OrchestratorConfig, Result,
};
