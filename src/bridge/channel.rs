//! Remote execution channel
//!
//! The bridge needs exactly two things from a container runtime: an OS
//! fingerprint of the target and "run this command inside the target with
//! these bytes on stdin".

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::{ExecutorError, Result};
use crate::engine::process::{run_process, Captured, CommandSpec, ProcessExit};

/// A long-lived container the bridge talks to. Only the name is held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    name: String,
}

impl RemoteTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Raw result of a command run inside a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl From<Captured> for RemoteOutput {
    fn from(captured: Captured) -> Self {
        let stderr = captured.stderr_lossy();
        Self {
            exit_code: captured.exit_code,
            stdout: captured.stdout,
            stderr,
        }
    }
}

#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Text identifying the target's OS. Fails with a setup error when the
    /// target cannot be reached at all.
    async fn fingerprint(&self, target: &RemoteTarget, cancel: &CancellationToken)
        -> Result<String>;

    /// Run `command` inside `target`, piping `stdin` to it
    async fn exec(
        &self,
        target: &RemoteTarget,
        command: &[String],
        stdin: &[u8],
        cancel: &CancellationToken,
    ) -> Result<RemoteOutput>;
}

/// Channel backed by the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerChannel {
    docker_bin: String,
    timeout: Duration,
}

impl DockerChannel {
    pub fn new(docker_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            timeout,
        }
    }

    async fn docker(
        &self,
        args: Vec<String>,
        stdin: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<Captured> {
        let mut spec = CommandSpec::new(&self.docker_bin).with_args(args);
        if let Some(bytes) = stdin {
            spec = spec.with_stdin(bytes.to_vec());
        }

        let exit = run_process(&spec, self.timeout, cancel).await.map_err(|e| {
            ExecutorError::setup(format!(
                "Remote execution channel unavailable ({}): {}",
                self.docker_bin, e
            ))
        })?;

        match exit {
            ProcessExit::Completed(captured) => Ok(captured),
            ProcessExit::TimedOut => Err(ExecutorError::setup(format!(
                "Remote execution timed out after {:?}",
                self.timeout
            ))),
            ProcessExit::Cancelled => Err(ExecutorError::setup("Remote execution was cancelled")),
        }
    }
}

#[async_trait]
impl RemoteChannel for DockerChannel {
    async fn fingerprint(
        &self,
        target: &RemoteTarget,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let running = self
            .docker(
                vec![
                    "inspect".to_string(),
                    "--format".to_string(),
                    "{{.State.Running}}".to_string(),
                    target.name().to_string(),
                ],
                None,
                cancel,
            )
            .await?;
        if running.exit_code != 0 || running.stdout_lossy() != "true" {
            return Err(ExecutorError::setup(format!(
                "Remote target '{}' is not running: {}",
                target,
                running.stderr_lossy()
            )));
        }

        let probes: [&[&str]; 2] = [&["uname", "-s"], &["cmd", "/c", "ver"]];
        let mut seen = Vec::new();
        for probe in probes {
            let mut args = vec!["exec".to_string(), target.name().to_string()];
            args.extend(probe.iter().map(|s| s.to_string()));
            let captured = self.docker(args, None, cancel).await?;
            debug!(
                "Probe {:?} on {} exited with {}",
                probe, target, captured.exit_code
            );
            if captured.exit_code == 0 {
                let text = captured.stdout_lossy();
                info!("Remote target {} fingerprint: {}", target, text);
                return Ok(text);
            }
            seen.push(captured.stderr_lossy());
        }

        Ok(seen.join("\n"))
    }

    async fn exec(
        &self,
        target: &RemoteTarget,
        command: &[String],
        stdin: &[u8],
        cancel: &CancellationToken,
    ) -> Result<RemoteOutput> {
        let mut args = vec!["exec".to_string(), "-i".to_string(), target.name().to_string()];
        args.extend(command.iter().cloned());
        debug!("docker exec on {}: {:?} ({} bytes in)", target, command, stdin.len());

        let captured = self.docker(args, Some(stdin), cancel).await?;
        Ok(captured.into())
    }
}
