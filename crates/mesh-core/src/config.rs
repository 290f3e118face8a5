//! Configuration management for the orchestrator
//!
//! Settings are layered from built-in defaults, an optional YAML file and
//! `MESH_`-prefixed environment variables (nested keys use `__`, e.g.
//! `MESH_WEIGHTS__ACTIVE=80`).

use crate::{InferenceNode, Result, TransportKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Top-level orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Configured inference nodes
    pub nodes: Vec<InferenceNode>,

    /// Seconds between health probe ticks
    pub probe_interval_seconds: u64,

    /// Per-probe timeout in seconds
    pub probe_timeout_seconds: u64,

    /// Per-attempt generate timeout in seconds
    pub generate_timeout_seconds: u64,

    /// Total attempts per generate call unless the request overrides it
    pub max_retries: u32,

    /// Load score weights
    pub weights: ScoringWeights,

    /// Consecutive failures after which a node is marked offline
    pub offline_threshold: u32,

    /// Consecutive failures after which a locally-managed node is restarted
    pub recovery_threshold: u32,

    /// Minimum seconds between two restart attempts of the same node
    pub recovery_cooldown_seconds: u64,

    /// Seconds `stop()` waits for in-flight generate calls
    pub shutdown_grace_seconds: u64,

    /// Number of latency samples kept per node
    pub latency_window: usize,

    /// Consider degraded nodes when no online node qualifies
    pub allow_degraded_fallback: bool,

    /// Health endpoint path on every node
    pub health_path: String,

    /// Generate endpoint path on every node
    pub generate_path: String,

    /// Logging settings for the binary
    pub logging: LoggingConfig,
}

impl OrchestratorConfig {
    /// Load configuration with precedence env > file > defaults, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.to_path_buf()).format(config::FileFormat::Yaml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MESH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Read a YAML file as-is, without environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let parsed: Self = serde_yaml::from_str(&content)?;
        Ok(parsed)
    }

    /// Write the configuration as YAML
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(crate::Error::config("At least one node must be configured"));
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(crate::Error::config("Node name cannot be empty"));
            }
            if !names.insert(node.name.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate node name: {}",
                    node.name
                )));
            }
            validate_node(node)?;
        }

        if self.probe_interval_seconds == 0 {
            return Err(crate::Error::config("Probe interval must be > 0"));
        }
        if self.probe_timeout_seconds == 0
            || self.probe_timeout_seconds >= self.probe_interval_seconds
        {
            return Err(crate::Error::config(
                "Probe timeout must be > 0 and below the probe interval",
            ));
        }
        if self.generate_timeout_seconds == 0 {
            return Err(crate::Error::config("Generate timeout must be > 0"));
        }
        if self.max_retries == 0 {
            return Err(crate::Error::config("max_retries must be at least 1"));
        }
        if self.offline_threshold == 0 || self.recovery_threshold == 0 {
            return Err(crate::Error::config("Failure thresholds must be > 0"));
        }
        if self.latency_window == 0 {
            return Err(crate::Error::config("Latency window must hold at least one sample"));
        }

        self.weights.validate()?;

        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_seconds)
    }

    pub fn recovery_cooldown(&self) -> Duration {
        Duration::from_secs(self.recovery_cooldown_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

fn validate_node(node: &InferenceNode) -> Result<()> {
    match node.transport {
        TransportKind::Direct => {
            let url = url::Url::parse(&node.address).map_err(|e| {
                crate::Error::config(format!(
                    "Node {} has an invalid address {}: {}",
                    node.name, node.address, e
                ))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(crate::Error::config(format!(
                    "Node {} address must use http or https",
                    node.name
                )));
            }
        }
        TransportKind::Tunneled => {
            let ssh = node.ssh.as_ref().ok_or_else(|| {
                crate::Error::config(format!(
                    "Tunneled node {} requires an ssh block",
                    node.name
                ))
            })?;
            if ssh.host.is_empty() {
                return Err(crate::Error::config(format!(
                    "Tunneled node {} has an empty ssh host",
                    node.name
                )));
            }
        }
    }

    if let Some(process) = &node.process {
        if process.command.is_empty() {
            return Err(crate::Error::config(format!(
                "Node {} has an empty process command",
                node.name
            )));
        }
    }

    Ok(())
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            nodes: vec![InferenceNode::new("local", "http://127.0.0.1:11434")],
            probe_interval_seconds: 15,
            probe_timeout_seconds: 3,
            generate_timeout_seconds: 120,
            max_retries: 3,
            weights: ScoringWeights::default(),
            offline_threshold: 3,
            recovery_threshold: 3,
            recovery_cooldown_seconds: 300,
            shutdown_grace_seconds: 10,
            latency_window: 10,
            allow_degraded_fallback: false,
            health_path: "/api/tags".to_string(),
            generate_path: "/api/generate".to_string(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Weights of the load score terms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Cost of one in-flight request
    pub active: f64,

    /// Cost of one second of mean latency
    pub latency: f64,

    /// Cost of one consecutive failure
    pub failures: f64,
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("active", self.active),
            ("latency", self.latency),
            ("failures", self.failures),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(crate::Error::config(format!(
                    "Weight {} must be a finite, non-negative number",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            active: 100.0,
            latency: 1.0,
            failures: 50.0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SshConfig;
    use std::io::Write;

    fn tunneled(name: &str) -> InferenceNode {
        InferenceNode::new(name, "http://127.0.0.1:11434").with_ssh(SshConfig {
            host: "gpu-box".to_string(),
            user: Some("ml".to_string()),
            port: Some(2222),
            identity_file: None,
            options: Vec::new(),
        })
    }

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.probe_interval(), Duration::from_secs(15));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.weights.active, 100.0);
        assert_eq!(config.weights.failures, 50.0);
        assert!(!config.allow_degraded_fallback);
    }

    #[test]
    fn test_config_validation() {
        let mut config = OrchestratorConfig::default();

        config.nodes.clear();
        assert!(config.validate().is_err());

        config.nodes = vec![
            InferenceNode::new("a", "http://10.0.0.1:11434"),
            InferenceNode::new("a", "http://10.0.0.2:11434"),
        ];
        assert!(config.validate().is_err());

        config.nodes[1].name = "b".to_string();
        assert!(config.validate().is_ok());

        config.probe_timeout_seconds = config.probe_interval_seconds;
        assert!(config.validate().is_err());
        config.probe_timeout_seconds = 3;

        config.generate_timeout_seconds = 0;
        assert!(config.validate().is_err());
        config.generate_timeout_seconds = 120;

        config.latency_window = 0;
        assert!(config.validate().is_err());
        config.latency_window = 10;

        config.weights.latency = f64::NAN;
        assert!(config.validate().is_err());
        config.weights.latency = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_address_validation() {
        let mut config = OrchestratorConfig::default();

        config.nodes = vec![InferenceNode::new("a", "not a url")];
        assert!(config.validate().is_err());

        config.nodes = vec![InferenceNode::new("a", "ftp://10.0.0.1")];
        assert!(config.validate().is_err());

        let mut missing_ssh = tunneled("remote");
        missing_ssh.ssh = None;
        config.nodes = vec![missing_ssh];
        assert!(config.validate().is_err());

        config.nodes = vec![tunneled("remote")];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_round_trip() {
        let mut config = OrchestratorConfig::default();
        config.nodes.push(tunneled("remote-gpu").with_priority(2));
        config.allow_degraded_fallback = true;

        let file = tempfile::NamedTempFile::new().unwrap();
        config.to_file(file.path()).unwrap();

        let loaded = OrchestratorConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_layers_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
nodes:
  - name: gpu-local
    address: http://127.0.0.1:11434
    priority: 1
    capabilities: ["llama3"]
  - name: cpu
    address: http://127.0.0.1:11435
    priority: 3
probe_interval_seconds: 20
weights:
  active: 80
"#
        )
        .unwrap();

        let config = OrchestratorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].name, "gpu-local");
        assert_eq!(config.probe_interval_seconds, 20);
        assert_eq!(config.probe_timeout_seconds, 3);
        assert_eq!(config.weights.active, 80.0);
        assert_eq!(config.weights.failures, 50.0);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "probe_interval_seconds: 2\nprobe_timeout_seconds: 5").unwrap();

        let err = OrchestratorConfig::load(Some(file.path())).unwrap_err();
        assert_eq!(err.category(), "configuration");
    }
}
