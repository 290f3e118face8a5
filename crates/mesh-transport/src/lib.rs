//! # mesh-transport
//!
//! Transports that reach inference nodes, plus the local process manager used
//! to restart locally-managed nodes.
//!
//! - [`DirectTransport`]: HTTP straight to the node address
//! - [`TunneledTransport`]: `curl` on an SSH host for nodes only reachable from there
//! - [`LocalProcessManager`]: the default [`ProcessRestarter`](mesh_core::ProcessRestarter)
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_core::{GenerateRequest, OrchestratorConfig};
//! use mesh_transport::build_transport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OrchestratorConfig::default();
//!     let transport = build_transport(&config.nodes[0], &config)?;
//!
//!     transport.health(config.probe_timeout()).await?;
//!     let text = transport
//!         .generate(&GenerateRequest::new("llama3", "Hello"), config.generate_timeout())
//!         .await?;
//!     println!("{}", text);
//!
//!     Ok(())
//! }
//! ```

use mesh_core::{InferenceNode, NodeTransport, OrchestratorConfig, Result, TransportKind};
use std::sync::Arc;

pub mod http;
pub mod process;
pub mod ssh;
pub mod wire;

pub use http::DirectTransport;
pub use process::LocalProcessManager;
pub use ssh::TunneledTransport;

/// Create the transport matching a node's configured kind
pub fn build_transport(
    node: &InferenceNode,
    config: &OrchestratorConfig,
) -> Result<Arc<dyn NodeTransport>> {
    match node.transport {
        TransportKind::Direct => Ok(Arc::new(DirectTransport::new(node, config)?)),
        TransportKind::Tunneled => Ok(Arc::new(TunneledTransport::new(node, config)?)),
    }
}
