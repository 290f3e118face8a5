//! Local process management for locally-managed nodes

use async_trait::async_trait;
use mesh_core::{Error, InferenceNode, ProcessConfig, ProcessRestarter, Result};
use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Restarts inference daemons on this host.
///
/// Processes launched here are tracked per node name and stopped with SIGTERM
/// on the next restart. A daemon this manager did not launch is stopped with
/// the node's `stop_command`, if one is configured.
#[derive(Default)]
pub struct LocalProcessManager {
    children: Mutex<HashMap<String, Child>>,
}

impl LocalProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a process launched for this node is still running
    pub async fn is_running(&self, node_name: &str) -> bool {
        let mut children = self.children.lock().await;
        match children.get_mut(node_name).map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(_) => {
                children.remove(node_name);
                false
            }
            None => false,
        }
    }

    async fn stop_tracked(&self, node_name: &str, mut child: Child, grace: Duration) {
        info!(node = %node_name, pid = child.id(), "Stopping managed process");

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
                warn!(node = %node_name, "Failed to send SIGTERM: {}", e);
            } else {
                debug!(node = %node_name, "Sent SIGTERM to process");
            }
        }

        let exited = timeout(grace, async {
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => return Ok(()),
                    Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match exited {
            Ok(Ok(())) => info!(node = %node_name, "Process stopped gracefully"),
            Ok(Err(e)) => error!(node = %node_name, "Error waiting for process: {}", e),
            Err(_) => {
                warn!(node = %node_name, "Graceful shutdown timed out, forcing kill");
                if let Err(e) = child.kill() {
                    error!(node = %node_name, "Failed to kill process: {}", e);
                }
                match tokio::task::spawn_blocking(move || child.wait()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        error!(node = %node_name, "Failed to wait for killed process: {}", e)
                    }
                    Err(e) => error!(node = %node_name, "Reaper task failed: {}", e),
                }
            }
        }
    }

    async fn run_stop_command(&self, node_name: &str, process: &ProcessConfig) {
        let Some((program, args)) = process
            .stop_command
            .as_ref()
            .and_then(|cmd| cmd.split_first())
        else {
            return;
        };

        info!(node = %node_name, command = %program, "Running stop command");

        let status = timeout(
            process.shutdown_timeout(),
            tokio::process::Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await;

        match status {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => warn!(node = %node_name, "Stop command exited with {}", status),
            Ok(Err(e)) => warn!(node = %node_name, "Failed to run stop command: {}", e),
            Err(_) => warn!(node = %node_name, "Stop command timed out"),
        }
    }

    fn spawn(process: &ProcessConfig) -> Result<Child> {
        let mut command = Command::new(&process.command);
        command.args(&process.args);

        for (key, value) in process.env_pairs() {
            command.env(key, value);
        }
        if let Some(working_dir) = &process.working_dir {
            command.current_dir(working_dir);
        }

        command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .stdin(Stdio::null());

        command
            .spawn()
            .map_err(|e| Error::recovery_failed(format!("Failed to spawn {}: {}", process.command, e)))
    }

    /// Watch a fresh process through its startup window.
    ///
    /// Returns the child if it is still running afterwards, `None` if it
    /// exited successfully (a launcher that daemonized), or an error if it
    /// exited with a failure status.
    async fn await_startup(mut child: Child, window: Duration) -> Result<Option<Child>> {
        let deadline = Instant::now() + window;
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(None),
                Ok(Some(status)) => {
                    return Err(Error::recovery_failed(format!(
                        "Process exited during startup with {}",
                        status
                    )))
                }
                Ok(None) if Instant::now() >= deadline => return Ok(Some(child)),
                Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => return Err(Error::recovery_failed(format!("Wait failed: {}", e))),
            }
        }
    }
}

#[async_trait]
impl ProcessRestarter for LocalProcessManager {
    async fn restart(&self, node: &InferenceNode) -> Result<()> {
        let process = node.process.as_ref().ok_or_else(|| {
            Error::recovery_failed(format!("Node {} has no process configuration", node.name))
        })?;

        info!(node = %node.name, command = %process.command, "Restarting local process");

        let previous = self.children.lock().await.remove(&node.name);
        match previous {
            Some(child) => {
                self.stop_tracked(&node.name, child, process.shutdown_timeout())
                    .await
            }
            None => self.run_stop_command(&node.name, process).await,
        }

        let child = Self::spawn(process)?;
        let pid = child.id();

        if let Some(child) = Self::await_startup(child, process.startup_timeout()).await? {
            self.children.lock().await.insert(node.name.clone(), child);
        }

        info!(node = %node.name, pid, "Local process restarted");
        Ok(())
    }
}

impl Drop for LocalProcessManager {
    fn drop(&mut self) {
        for (name, mut child) in self.children.get_mut().drain() {
            warn!(node = %name, "Process manager dropped with running process, attempting cleanup");
            if let Err(e) = child.kill() {
                error!(node = %name, "Failed to kill process during cleanup: {}", e);
            }
            let _ = child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn managed(command: &str, args: &[&str]) -> InferenceNode {
        let mut process =
            ProcessConfig::new(command).with_args(args.iter().map(|a| a.to_string()).collect());
        process.startup_timeout_seconds = 0;
        process.shutdown_timeout_seconds = 2;
        InferenceNode::new("local-gpu", "http://127.0.0.1:11434").locally_managed(Some(process))
    }

    #[tokio::test]
    async fn test_restart_requires_process_config() {
        let manager = LocalProcessManager::new();
        let node = InferenceNode::new("local-gpu", "http://127.0.0.1:11434").locally_managed(None);

        let err = manager.restart(&node).await.unwrap_err();
        assert_eq!(err.category(), "recovery_failed");
    }

    #[tokio::test]
    async fn test_restart_tracks_and_replaces_process() {
        let manager = LocalProcessManager::new();
        let node = managed("sleep", &["30"]);

        manager.restart(&node).await.unwrap();
        assert!(manager.is_running("local-gpu").await);
        let first_pid = manager.children.lock().await["local-gpu"].id();

        manager.restart(&node).await.unwrap();
        assert!(manager.is_running("local-gpu").await);
        let second_pid = manager.children.lock().await["local-gpu"].id();
        assert_ne!(first_pid, second_pid);
    }

    #[tokio::test]
    async fn test_stop_kills_process_ignoring_sigterm() {
        use nix::sys::signal;
        use nix::unistd::Pid;

        let manager = LocalProcessManager::new();
        let process = ProcessConfig::new("sh").with_args(vec![
            "-c".to_string(),
            "trap '' TERM; exec sleep 30".to_string(),
        ]);
        let child = LocalProcessManager::spawn(&process).unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        manager
            .stop_tracked("stubborn", child, Duration::from_millis(500))
            .await;

        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(signal::kill(pid, None).is_err(), "process was not reaped");
    }

    #[tokio::test]
    async fn test_launcher_that_exits_cleanly_is_success() {
        let manager = LocalProcessManager::new();
        let mut node = managed("true", &[]);
        if let Some(process) = node.process.as_mut() {
            process.startup_timeout_seconds = 1;
        }

        manager.restart(&node).await.unwrap();
        assert!(!manager.is_running("local-gpu").await);
    }

    #[tokio::test]
    async fn test_failing_process_reports_recovery_failure() {
        let manager = LocalProcessManager::new();
        let mut node = managed("false", &[]);
        if let Some(process) = node.process.as_mut() {
            process.startup_timeout_seconds = 1;
        }

        let err = manager.restart(&node).await.unwrap_err();
        assert!(matches!(err, Error::RecoveryActionFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_recovery_failure() {
        let manager = LocalProcessManager::new();
        let node = managed("/nonexistent/inference-daemon", &[]);

        let err = manager.restart(&node).await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
