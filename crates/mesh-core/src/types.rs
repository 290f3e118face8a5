//! Core type definitions for the inference mesh

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How the orchestrator reaches a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain HTTP against the node address
    Direct,
    /// Remote execution over SSH against a node only reachable from the SSH host
    #[serde(alias = "tunnelled", alias = "ssh")]
    Tunneled,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Direct => write!(f, "direct"),
            TransportKind::Tunneled => write!(f, "tunneled"),
        }
    }
}

/// Live health status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Never probed
    Unknown,
    /// Last probe succeeded
    Online,
    /// Isolated probe failure or failed dispatch attempt
    Degraded,
    /// Failure threshold crossed
    Offline,
}

impl NodeStatus {
    /// Whether this status takes part in normal selection
    pub fn is_online(&self) -> bool {
        matches!(self, NodeStatus::Online)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Unknown => write!(f, "unknown"),
            NodeStatus::Online => write!(f, "online"),
            NodeStatus::Degraded => write!(f, "degraded"),
            NodeStatus::Offline => write!(f, "offline"),
        }
    }
}

/// SSH connection settings for tunneled nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshConfig {
    /// SSH host name or address
    pub host: String,

    /// Remote user
    #[serde(default)]
    pub user: Option<String>,

    /// SSH port
    #[serde(default)]
    pub port: Option<u16>,

    /// Private key path
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Extra `-o` options passed verbatim, e.g. `StrictHostKeyChecking=no`
    #[serde(default)]
    pub options: Vec<String>,
}

impl SshConfig {
    /// The `user@host` destination string
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

/// Local process settings used to restart a locally-managed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Command that launches the inference daemon
    pub command: String,

    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables as `KEY=VALUE` entries
    #[serde(default)]
    pub env: Vec<String>,

    /// Working directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Command run before relaunching when the daemon was not started by us
    #[serde(default)]
    pub stop_command: Option<Vec<String>>,

    /// Seconds to wait after launch before the restart counts as done
    #[serde(default = "default_startup_seconds")]
    pub startup_timeout_seconds: u64,

    /// Seconds to wait for a graceful exit before killing
    #[serde(default = "default_shutdown_seconds")]
    pub shutdown_timeout_seconds: u64,
}

fn default_startup_seconds() -> u64 {
    5
}

fn default_shutdown_seconds() -> u64 {
    10
}

impl ProcessConfig {
    /// Create a process config for a bare command
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            stop_command: None,
            startup_timeout_seconds: default_startup_seconds(),
            shutdown_timeout_seconds: default_shutdown_seconds(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Environment entries split into key/value pairs. Entries without `=` are skipped.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|entry| entry.split_once('='))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// A configured inference back-end. Immutable for the orchestrator's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceNode {
    /// Unique node name
    pub name: String,

    /// Base URL of the inference server. For tunneled nodes this is the URL as
    /// seen from the SSH host, typically `http://127.0.0.1:11434`.
    pub address: String,

    /// Transport used to reach the node
    #[serde(default = "default_transport")]
    pub transport: TransportKind,

    /// Static priority, lower is preferred on score ties
    #[serde(default)]
    pub priority: u32,

    /// Models this node can serve. Empty means any.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Whether the orchestrator may restart the node's local process
    #[serde(default)]
    pub locally_managed: bool,

    /// SSH settings, required for tunneled nodes
    #[serde(default)]
    pub ssh: Option<SshConfig>,

    /// Restart settings for locally-managed nodes
    #[serde(default)]
    pub process: Option<ProcessConfig>,
}

fn default_transport() -> TransportKind {
    TransportKind::Direct
}

impl InferenceNode {
    /// Create a direct node with default settings
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            transport: TransportKind::Direct,
            priority: 0,
            capabilities: Vec::new(),
            locally_managed: false,
            ssh: None,
            process: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ssh(mut self, ssh: SshConfig) -> Self {
        self.transport = TransportKind::Tunneled;
        self.ssh = Some(ssh);
        self
    }

    pub fn locally_managed(mut self, process: Option<ProcessConfig>) -> Self {
        self.locally_managed = true;
        self.process = process;
        self
    }

    /// Whether this node advertises the given model
    pub fn serves_model(&self, model: &str) -> bool {
        if self.capabilities.is_empty() {
            return true;
        }
        let wanted = normalize_model(model);
        self.capabilities
            .iter()
            .any(|tag| normalize_model(tag) == wanted)
    }
}

/// Strip the implicit `:latest` tag so `llama3` and `llama3:latest` compare equal
fn normalize_model(model: &str) -> &str {
    model.strip_suffix(":latest").unwrap_or(model)
}

/// A single inference request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier
    pub model: String,

    /// Prompt payload
    pub prompt: String,

    /// Ask the node for a chunked response
    #[serde(default)]
    pub stream: bool,

    /// Overrides the configured attempt budget for this call
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: false,
            max_retries: None,
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Outcome of a successful generate call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResult {
    /// Produced text
    pub text: String,

    /// Name of the node that served the request
    pub node_used: String,

    /// Latency of the successful attempt in milliseconds
    pub latency_ms: f64,

    /// Number of failed attempts before the successful one
    pub retry_count: u32,
}

/// Payload of a successful health probe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Models the node reported, if its health payload lists them
    pub models: Vec<String>,
}
