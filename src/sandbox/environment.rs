//! Ephemeral environment management
//!
//! One throwaway directory per sandboxed invocation holding a private
//! interpreter installation and the generated script. The directory is removed
//! when the environment is dropped, whichever way the invocation ends.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{ExecutorError, Result};
use crate::engine::process::{run_process, CommandSpec, ProcessExit};

const DIR_PREFIX: &str = "action_venv_";
const SCRIPT_NAME: &str = "action.py";

/// How to build an environment
#[derive(Debug, Clone)]
pub struct EnvironmentSpec {
    /// Host interpreter that creates the environment
    pub python: String,
    pub with_pip: bool,
    /// Bound on building the environment, independent of the action's timeout
    pub setup_timeout: Duration,
    /// Parent directory (system temp dir if `None`)
    pub work_root: Option<PathBuf>,
}

/// A private runtime installation owned by exactly one invocation
pub struct EphemeralEnvironment {
    dir: TempDir,
    python: PathBuf,
}

impl EphemeralEnvironment {
    /// Create the directory and install an isolated interpreter into it.
    ///
    /// Any failure here is a setup error: no isolation guarantee can be made.
    pub async fn create(
        spec: &EnvironmentSpec,
        child_env: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(DIR_PREFIX);
        let dir = match &spec.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| ExecutorError::setup(format!("Failed to create environment directory: {}", e)))?;

        let venv_dir = dir.path().join("venv");
        let mut args = vec!["-m".to_string(), "venv".to_string()];
        if !spec.with_pip {
            args.push("--without-pip".to_string());
        }
        args.push(venv_dir.to_string_lossy().into_owned());

        let command = CommandSpec::new(&spec.python)
            .with_args(args)
            .with_env(child_env.iter().cloned())
            .with_work_dir(dir.path());

        debug!("Creating environment at {:?}", venv_dir);
        let exit = run_process(&command, spec.setup_timeout, cancel).await.map_err(|e| {
            ExecutorError::setup(format!("Failed to run {} -m venv: {}", spec.python, e))
        })?;

        match exit {
            ProcessExit::Completed(captured) if captured.exit_code == 0 => {}
            ProcessExit::Completed(captured) => {
                return Err(ExecutorError::setup(format!(
                    "Failed to create environment (exit code {}): {}",
                    captured.exit_code,
                    captured.stderr_lossy()
                )));
            }
            ProcessExit::TimedOut => {
                return Err(ExecutorError::setup(format!(
                    "Environment creation timed out after {:?}",
                    spec.setup_timeout
                )));
            }
            ProcessExit::Cancelled => {
                return Err(ExecutorError::setup("Environment creation was cancelled"));
            }
        }

        let python = if cfg!(windows) {
            venv_dir.join("Scripts").join("python.exe")
        } else {
            venv_dir.join("bin").join("python")
        };

        info!("Created ephemeral environment at {:?}", dir.path());
        Ok(Self { dir, python })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Interpreter inside the environment
    pub fn python(&self) -> &Path {
        &self.python
    }

    /// Write the generated script into the environment
    pub async fn write_script(&self, script: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(SCRIPT_NAME);
        fs::write(&path, script).await?;
        Ok(path)
    }

    /// Remove the environment now, logging instead of failing
    pub fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => info!("Removed ephemeral environment at {:?}", path),
            Err(e) => warn!("Failed to remove ephemeral environment {:?}: {}", path, e),
        }
    }
}
