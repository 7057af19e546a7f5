//! Remote GUI bridge
//!
//! GUI-mode actions never run locally. For each call the bridge:
//! 1. probes the target's OS (unknown is fatal)
//! 2. picks that OS's payload from the registry
//! 3. pipes the payload into the target's interpreter
//! 4. on the missing-dependency exit code, installs the dependency once and
//!    retries once
//! 5. validates the output
//!
//! Every failure here is an infrastructure failure and is returned as an
//! error rather than folded into an action result.

pub mod channel;
pub mod payloads;

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{ActionResult, ExecutorError, ProcessOutput, Result};
use crate::sandbox::harness::{render_with_prelude, HarnessMode};
use crate::sandbox::SandboxConfig;

pub use channel::{DockerChannel, RemoteChannel, RemoteOutput, RemoteTarget};
pub use payloads::{CaptureFormat, Dependency, OsFamily, OsPayload, PayloadRegistry};

/// Exit code a payload uses to report its dependency is absent
pub const DEPENDENCY_MISSING_EXIT_CODE: i32 = 10;

pub struct GuiBridge {
    channel: Arc<dyn RemoteChannel>,
    payloads: Arc<PayloadRegistry>,
    target: RemoteTarget,
}

impl GuiBridge {
    pub fn new(
        channel: Arc<dyn RemoteChannel>,
        payloads: Arc<PayloadRegistry>,
        target: RemoteTarget,
    ) -> Self {
        Self {
            channel,
            payloads,
            target,
        }
    }

    /// Bridge to the configured target over the docker CLI
    pub fn from_config(config: &SandboxConfig) -> anyhow::Result<Self> {
        let channel = DockerChannel::new(&config.docker_bin, config.bridge_timeout());
        Ok(Self::new(
            Arc::new(channel),
            PayloadRegistry::embedded()?,
            RemoteTarget::new(&config.gui_target),
        ))
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Probe the target and classify its OS
    pub async fn detect_os(&self, cancel: &CancellationToken) -> Result<OsFamily> {
        let fingerprint = self.channel.fingerprint(&self.target, cancel).await?;
        let os = OsFamily::classify(&fingerprint).ok_or_else(|| ExecutorError::UnknownOs {
            target: self.target.to_string(),
            fingerprint: fingerprint.clone(),
        })?;
        debug!("Remote target {} runs {}", self.target, os);
        Ok(os)
    }

    /// Capture the target's primary screen; the bytes are checked against the
    /// registry's capture format
    pub async fn capture_screen(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let os = self.detect_os(cancel).await?;
        let payload = self.payload_for(os)?;

        let output = self
            .execute_with_recovery(
                payload,
                &payload.capture_command,
                payload.capture_script.as_bytes(),
                cancel,
            )
            .await?;
        validate(&output)?;

        let format = self.payloads.capture_format();
        if !format.matches(&output.stdout) {
            return Err(ExecutorError::InvalidFormat {
                format: format.name.clone(),
            });
        }

        info!(
            "Captured {} bytes of {} from {}",
            output.stdout.len(),
            format.name,
            self.target
        );
        Ok(output.stdout)
    }

    /// Run GUI action code inside the target
    pub async fn run_action(
        &self,
        code: &str,
        input: &Value,
        cancel: &CancellationToken,
    ) -> Result<ActionResult> {
        let os = self.detect_os(cancel).await?;
        let payload = self.payload_for(os)?;
        let script = render_with_prelude(code, input, HarnessMode::Sandboxed, &payload.action_prelude)?;

        let output = self
            .execute_with_recovery(payload, &payload.action_command, script.as_bytes(), cancel)
            .await?;
        validate(&output)?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(ProcessOutput::from_exit(0, stdout, output.stderr).into())
    }

    fn payload_for(&self, os: OsFamily) -> Result<&OsPayload> {
        self.payloads
            .get(os)
            .ok_or_else(|| ExecutorError::setup(format!("No payload registered for {}", os)))
    }

    /// Run a payload; on the missing-dependency code install it and retry
    /// exactly once. The retry's output is returned as-is for validation.
    async fn execute_with_recovery(
        &self,
        payload: &OsPayload,
        command: &[String],
        script: &[u8],
        cancel: &CancellationToken,
    ) -> Result<RemoteOutput> {
        let first = self
            .channel
            .exec(&self.target, command, script, cancel)
            .await?;
        if first.exit_code != DEPENDENCY_MISSING_EXIT_CODE {
            return Ok(first);
        }
        let Some(dependency) = &payload.dependency else {
            return Ok(first);
        };

        warn!(
            "Payload on {} reports missing dependency {}; installing",
            self.target, dependency.package
        );
        self.install(dependency, cancel).await?;

        self.channel
            .exec(&self.target, command, script, cancel)
            .await
    }

    async fn install(&self, dependency: &Dependency, cancel: &CancellationToken) -> Result<()> {
        let output = self
            .channel
            .exec(&self.target, &dependency.install_command, &[], cancel)
            .await?;
        if output.exit_code != 0 {
            return Err(ExecutorError::setup(format!(
                "Failed to install {} into {} (exit code {}): {}",
                dependency.package, self.target, output.exit_code, output.stderr
            )));
        }
        info!("Installed {} into {}", dependency.package, self.target);
        Ok(())
    }
}

fn validate(output: &RemoteOutput) -> Result<()> {
    if output.exit_code != 0 {
        return Err(ExecutorError::RemoteFailure {
            code: output.exit_code,
            stderr: output.stderr.clone(),
        });
    }
    if output.stdout.is_empty() {
        return Err(ExecutorError::EmptyOutput);
    }
    Ok(())
}
