//! Sandboxed runner implementation
//!
//! Executes untrusted action code in a throwaway environment: a fresh
//! interpreter installation in a private temp directory, removed on every
//! exit path.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Invocation, Runner};
use crate::bridge::GuiBridge;
use crate::core::{ActionResult, InteractionMode, ProcessOutput, Result};
use crate::engine::pool::WorkerContext;
use crate::engine::process::{run_process, CommandSpec, ProcessExit};
use crate::sandbox::harness::{render, HarnessMode};
use crate::sandbox::{EnvironmentSpec, EphemeralEnvironment};

/// Runner that executes code in an ephemeral environment
pub struct SandboxedRunner {
    environment: EnvironmentSpec,
    bridge: Arc<GuiBridge>,
}

impl SandboxedRunner {
    pub fn new(environment: EnvironmentSpec, bridge: Arc<GuiBridge>) -> Self {
        Self {
            environment,
            bridge,
        }
    }

    /// Run `code` with `input`. `timeout` bounds the action's own process;
    /// building the environment has its own budget.
    pub async fn execute(
        &self,
        code: &str,
        input: &Value,
        timeout: Duration,
        mode: InteractionMode,
        ctx: &WorkerContext,
    ) -> Result<ActionResult> {
        // GUI actions always execute in the remote target
        if mode == InteractionMode::Gui {
            return self.bridge.run_action(code, input, &ctx.cancel).await;
        }

        let script = render(code, input, HarnessMode::Sandboxed)?;
        let environment =
            EphemeralEnvironment::create(&self.environment, &ctx.child_env, &ctx.cancel).await?;

        let output = run_script(&environment, &script, timeout, ctx).await;

        environment.cleanup();
        Ok(output.into())
    }
}

async fn run_script(
    environment: &EphemeralEnvironment,
    script: &str,
    timeout: Duration,
    ctx: &WorkerContext,
) -> ProcessOutput {
    let script_path = match environment.write_script(script).await {
        Ok(path) => path,
        Err(e) => return ProcessOutput::launch_failure(format!("Execution failed: {}", e)),
    };

    let command = CommandSpec::new(environment.python().to_string_lossy())
        .with_args([script_path.to_string_lossy().into_owned()])
        .with_env(ctx.child_env.iter().cloned())
        .with_work_dir(environment.path());

    match run_process(&command, timeout, &ctx.cancel).await {
        Ok(ProcessExit::Completed(captured)) => {
            debug!("Action script exited with code {}", captured.exit_code);
            ProcessOutput::from_exit(
                captured.exit_code,
                captured.stdout_lossy(),
                captured.stderr_lossy(),
            )
        }
        Ok(ProcessExit::TimedOut) => {
            warn!("Action script timed out after {:?}", timeout);
            ProcessOutput::timed_out()
        }
        Ok(ProcessExit::Cancelled) => {
            info!("Action script cancelled by the outer deadline");
            ProcessOutput::timed_out()
        }
        Err(e) => ProcessOutput::launch_failure(format!("Execution failed: {}", e)),
    }
}

#[async_trait]
impl Runner for SandboxedRunner {
    async fn run(&self, invocation: &Invocation, ctx: &WorkerContext) -> Result<ActionResult> {
        info!(
            "Running sandboxed action '{}' (run_id={})",
            invocation.action.name, invocation.run_id
        );
        self.execute(
            &invocation.action.code,
            &invocation.input,
            invocation.timeout,
            invocation.action.mode,
            ctx,
        )
        .await
    }
}
