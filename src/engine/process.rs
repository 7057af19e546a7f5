//! Child process execution
//!
//! Runs a single command with captured output, optional piped input, a hard
//! wall-clock timeout and a cancellation token. On timeout or cancellation the
//! whole process group is killed and the child is reaped before returning.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Command specification for execution
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Extra environment variables for the child only
    pub env: Vec<(String, String)>,
    /// Working directory
    pub work_dir: Option<PathBuf>,
    /// Bytes piped to the child's stdin (stdin is closed when `None`)
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            work_dir: None,
            stdin: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = env.into_iter().collect();
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// Output of a child that ran to completion
#[derive(Debug)]
pub struct Captured {
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Captured {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// How a child run ended
#[derive(Debug)]
pub enum ProcessExit {
    Completed(Captured),
    /// The wall-clock timeout fired and the child was killed
    TimedOut,
    /// The cancellation token fired and the child was killed
    Cancelled,
}

/// Spawn `spec` and wait for it, bounded by `timeout` and `cancel`.
///
/// Only spawn and wait failures are returned as `Err`; a non-zero exit is a
/// normal `Completed` outcome.
pub async fn run_process(
    spec: &CommandSpec,
    timeout: Duration,
    cancel: &CancellationToken,
) -> std::io::Result<ProcessExit> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &spec.work_dir {
        cmd.current_dir(dir);
    }

    // Own process group so a timeout takes down anything the child forked
    #[cfg(unix)]
    cmd.process_group(0);

    debug!("Spawning {} with args: {:?}", spec.program, spec.args);
    let mut child = cmd.spawn()?;
    let pid = child.id();

    let stdin_pipe = child.stdin.take();
    let stdin_bytes = spec.stdin.clone();
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let feed = async move {
        if let (Some(mut pipe), Some(bytes)) = (stdin_pipe, stdin_bytes) {
            if let Err(e) = pipe.write_all(&bytes).await {
                debug!("Child closed stdin early: {}", e);
            }
            // pipe dropped here, closing the child's stdin
        }
    };

    let waited = tokio::select! {
        res = async {
            let ((), stdout, stderr) = tokio::join!(
                feed,
                read_to_end(stdout_pipe.as_mut()),
                read_to_end(stderr_pipe.as_mut()),
            );
            child.wait().await.map(|status| (status, stdout, stderr))
        } => Ok(res),
        _ = tokio::time::sleep(timeout) => Err(ProcessExit::TimedOut),
        _ = cancel.cancelled() => Err(ProcessExit::Cancelled),
    };

    match waited {
        Ok(res) => {
            let (status, stdout, stderr) = res?;
            let exit_code = status.code().unwrap_or(-1);
            debug!("{} exited with code {}", spec.program, exit_code);
            Ok(ProcessExit::Completed(Captured {
                exit_code,
                stdout,
                stderr,
            }))
        }
        Err(interrupted) => {
            warn!(
                "Terminating {} (pid {:?}): {:?} after {:?}",
                spec.program, pid, interrupted, timeout
            );
            terminate(&mut child, pid).await;
            Ok(interrupted)
        }
    }
}

async fn read_to_end<R: AsyncRead + Unpin>(pipe: Option<&mut R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Failed to read child output: {}", e);
        }
    }
    buf
}

/// Kill the child's process group, then the child itself, and reap it
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        debug!("Child already gone: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let spec = CommandSpec::new("sh").with_args(["-c", "echo out; echo err >&2; exit 3"]);
        let exit = run_process(&spec, Duration::from_secs(10), &CancellationToken::new())
            .await
            .unwrap();

        match exit {
            ProcessExit::Completed(captured) => {
                assert_eq!(captured.exit_code, 3);
                assert_eq!(captured.stdout_lossy(), "out");
                assert_eq!(captured.stderr_lossy(), "err");
            }
            other => panic!("unexpected exit: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pipes_stdin() {
        let spec = CommandSpec::new("cat").with_stdin(b"payload bytes".to_vec());
        let exit = run_process(&spec, Duration::from_secs(10), &CancellationToken::new())
            .await
            .unwrap();

        match exit {
            ProcessExit::Completed(captured) => assert_eq!(captured.stdout, b"payload bytes"),
            other => panic!("unexpected exit: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_child_env_is_scoped() {
        let spec = CommandSpec::new("sh")
            .with_args(["-c", "echo $ACTION_SANDBOX_SCOPED"])
            .with_env([("ACTION_SANDBOX_SCOPED".to_string(), "child-only".to_string())]);
        let exit = run_process(&spec, Duration::from_secs(10), &CancellationToken::new())
            .await
            .unwrap();

        match exit {
            ProcessExit::Completed(captured) => assert_eq!(captured.stdout_lossy(), "child-only"),
            other => panic!("unexpected exit: {:?}", other),
        }
        assert!(std::env::var("ACTION_SANDBOX_SCOPED").is_err());
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        // The backgrounded sleep keeps stdout open; only a group kill lets this return
        let spec = CommandSpec::new("sh").with_args(["-c", "sleep 30 & sleep 30"]);
        let start = Instant::now();
        let exit = run_process(&spec, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(exit, ProcessExit::TimedOut));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let spec = CommandSpec::new("sleep").with_args(["30"]);
        let exit = run_process(&spec, Duration::from_secs(60), &cancel)
            .await
            .unwrap();
        assert!(matches!(exit, ProcessExit::Cancelled));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_err() {
        let spec = CommandSpec::new("/nonexistent/program");
        let result = run_process(&spec, Duration::from_secs(1), &CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
