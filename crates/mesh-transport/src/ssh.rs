//! SSH-tunneled transport
//!
//! The node is only reachable from the SSH host, so each call runs `curl` on
//! that host over a non-interactive `ssh` session. The request body travels on
//! stdin and curl appends the HTTP status code as the last output line.

use crate::wire::{self, GenerateBody};
use async_trait::async_trait;
use mesh_core::{
    Error, GenerateRequest, HealthReport, InferenceNode, NodeTransport, OrchestratorConfig, Result,
    SshConfig, TransportKind,
};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// ssh reserves this exit code for its own connection failures
const SSH_CONNECTION_FAILURE: i32 = 255;
/// curl exit code for "operation timed out"
const CURL_TIMEOUT: i32 = 28;
const MAX_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Output of one remote curl invocation
#[derive(Debug, PartialEq)]
struct RemoteReply {
    status: u16,
    body: String,
}

#[derive(Debug)]
enum RemoteFailure {
    TimedOut,
    Unreachable(String),
}

/// Transport that reaches a node through `ssh` remote execution
pub struct TunneledTransport {
    name: String,
    ssh: SshConfig,
    health_url: String,
    generate_url: String,
}

impl TunneledTransport {
    pub fn new(node: &InferenceNode, config: &OrchestratorConfig) -> Result<Self> {
        let ssh = node.ssh.clone().ok_or_else(|| {
            Error::config(format!("Tunneled node {} requires an ssh block", node.name))
        })?;

        Ok(Self {
            name: node.name.clone(),
            ssh,
            health_url: wire::endpoint_url(&node.address, &config.health_path),
            generate_url: wire::endpoint_url(&node.address, &config.generate_path),
        })
    }

    /// Arguments passed to the local `ssh` binary, destination included
    fn ssh_args(&self, timeout: Duration) -> Vec<String> {
        let connect = whole_seconds(timeout).min(MAX_CONNECT_TIMEOUT_SECS);
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect),
        ];

        for option in &self.ssh.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        if let Some(port) = self.ssh.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.ssh.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }

        args.push(self.ssh.destination());
        args
    }

    async fn run_remote(
        &self,
        url: &str,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> std::result::Result<RemoteReply, RemoteFailure> {
        let remote = curl_command(url, body.is_some(), timeout);

        let mut command = Command::new("ssh");
        command
            .args(self.ssh_args(timeout))
            .arg(remote)
            .stdin(if body.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let call = async {
            let mut child = command
                .spawn()
                .map_err(|e| RemoteFailure::Unreachable(format!("failed to spawn ssh: {}", e)))?;

            if let (Some(body), Some(mut stdin)) = (body, child.stdin.take()) {
                stdin
                    .write_all(&body)
                    .await
                    .map_err(|e| RemoteFailure::Unreachable(format!("failed to send body: {}", e)))?;
            }

            child
                .wait_with_output()
                .await
                .map_err(|e| RemoteFailure::Unreachable(format!("ssh failed: {}", e)))
        };

        let output = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| RemoteFailure::TimedOut)??;

        match output.status.code() {
            Some(0) => {}
            Some(CURL_TIMEOUT) => return Err(RemoteFailure::TimedOut),
            Some(SSH_CONNECTION_FAILURE) => {
                return Err(RemoteFailure::Unreachable(format!(
                    "ssh connection to {} failed: {}",
                    self.ssh.destination(),
                    String::from_utf8_lossy(&output.stderr).trim()
                )))
            }
            code => {
                return Err(RemoteFailure::Unreachable(format!(
                    "remote curl exited with {:?}: {}",
                    code,
                    String::from_utf8_lossy(&output.stderr).trim()
                )))
            }
        }

        split_status(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| RemoteFailure::Unreachable("missing HTTP status in curl output".to_string()))
    }
}

#[async_trait]
impl NodeTransport for TunneledTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tunneled
    }

    async fn health(&self, timeout: Duration) -> Result<HealthReport> {
        debug!(node = %self.name, host = %self.ssh.host, "Probing node over ssh");

        let reply = self
            .run_remote(&self.health_url, None, timeout)
            .await
            .map_err(|failure| match failure {
                RemoteFailure::TimedOut => {
                    Error::probe_timeout(format!("{}: no reply within {:?}", self.name, timeout))
                }
                RemoteFailure::Unreachable(reason) => {
                    Error::probe_unreachable(format!("{}: {}", self.name, reason))
                }
            })?;

        if !(200..300).contains(&reply.status) {
            return Err(Error::probe_unreachable(format!(
                "{}: health check returned {}",
                self.name, reply.status
            )));
        }

        Ok(HealthReport {
            models: wire::parse_models(&reply.body),
        })
    }

    async fn generate(&self, request: &GenerateRequest, timeout: Duration) -> Result<String> {
        debug!(node = %self.name, model = %request.model, "Sending generate request over ssh");

        let body = serde_json::to_vec(&GenerateBody::from(request))?;
        let reply = self
            .run_remote(&self.generate_url, Some(body), timeout)
            .await
            .map_err(|failure| match failure {
                RemoteFailure::TimedOut => {
                    Error::attempt_failed(&self.name, format!("timed out after {:?}", timeout))
                }
                RemoteFailure::Unreachable(reason) => Error::attempt_failed(&self.name, reason),
            })?;

        if !(200..300).contains(&reply.status) {
            return Err(Error::attempt_failed(
                &self.name,
                format!("HTTP {}: {}", reply.status, wire::excerpt(&reply.body)),
            ));
        }

        wire::parse_generate_body(&reply.body, request.stream)
            .map_err(|reason| Error::attempt_failed(&self.name, reason))
    }
}

/// Remote shell command run on the SSH host
fn curl_command(url: &str, with_body: bool, timeout: Duration) -> String {
    let mut parts = vec![
        "curl".to_string(),
        "-sS".to_string(),
        "-m".to_string(),
        whole_seconds(timeout).to_string(),
        "-w".to_string(),
        shell_quote(r"\n%{http_code}"),
    ];
    if with_body {
        parts.extend([
            "-X".to_string(),
            "POST".to_string(),
            "-H".to_string(),
            shell_quote("Content-Type: application/json"),
            "--data-binary".to_string(),
            "@-".to_string(),
        ]);
    }
    parts.push(shell_quote(url));
    parts.join(" ")
}

/// Quote a value for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Round up to whole seconds, never below one
fn whole_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

/// Split curl output into body and the trailing status line
fn split_status(output: &str) -> Option<RemoteReply> {
    let (body, status) = match output.rsplit_once('\n') {
        Some((body, status)) => (body, status),
        None => ("", output),
    };
    let status = status.trim().parse().ok()?;
    Some(RemoteReply {
        status,
        body: body.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn node() -> InferenceNode {
        InferenceNode::new("remote-gpu", "http://127.0.0.1:11434").with_ssh(SshConfig {
            host: "gpu-box".to_string(),
            user: Some("ml".to_string()),
            port: Some(2222),
            identity_file: Some(PathBuf::from("/home/ml/.ssh/id_ed25519")),
            options: vec!["StrictHostKeyChecking=accept-new".to_string()],
        })
    }

    #[test]
    fn test_requires_ssh_block() {
        let mut bare = node();
        bare.ssh = None;
        assert!(TunneledTransport::new(&bare, &OrchestratorConfig::default()).is_err());
    }

    #[test]
    fn test_ssh_args() {
        let transport = TunneledTransport::new(&node(), &OrchestratorConfig::default()).unwrap();
        let args = transport.ssh_args(Duration::from_secs(120));

        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-p",
                "2222",
                "-i",
                "/home/ml/.ssh/id_ed25519",
                "ml@gpu-box",
            ]
        );
        assert_eq!(transport.health_url, "http://127.0.0.1:11434/api/tags");
        assert_eq!(transport.kind(), TransportKind::Tunneled);
    }

    #[test]
    fn test_curl_command() {
        let probe = curl_command("http://127.0.0.1:11434/api/tags", false, Duration::from_millis(2500));
        assert_eq!(
            probe,
            r"curl -sS -m 3 -w '\n%{http_code}' 'http://127.0.0.1:11434/api/tags'"
        );

        let generate = curl_command("http://127.0.0.1:11434/api/generate", true, Duration::from_secs(120));
        assert!(generate.contains("--data-binary @-"));
        assert!(generate.contains("-X POST"));
        assert!(generate.ends_with("'http://127.0.0.1:11434/api/generate'"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_split_status() {
        assert_eq!(
            split_status("{\"response\":\"hi\"}\n200"),
            Some(RemoteReply {
                status: 200,
                body: "{\"response\":\"hi\"}".to_string()
            })
        );
        assert_eq!(
            split_status("\n503"),
            Some(RemoteReply {
                status: 503,
                body: String::new()
            })
        );
        assert_eq!(split_status("204").map(|r| r.status), Some(204));
        assert!(split_status("garbage").is_none());
    }

    #[test]
    fn test_whole_seconds() {
        assert_eq!(whole_seconds(Duration::from_millis(0)), 1);
        assert_eq!(whole_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(whole_seconds(Duration::from_secs(3)), 3);
    }
}
