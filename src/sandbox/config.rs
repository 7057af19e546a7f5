//! Sandbox configuration
//!
//! Configuration for the execution core, loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::core::DEFAULT_ACTION_TIMEOUT_SECS;

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Host interpreter used to build ephemeral environments and run trusted code
    pub python: String,
    /// Number of sandboxed invocations that may run at once
    pub pool_size: usize,
    /// Inner timeout when an action declares none (seconds)
    pub default_timeout_secs: u64,
    /// Extra time the outer deadline grants on top of the inner timeout (seconds)
    pub outer_grace_secs: u64,
    /// Bound on building one ephemeral environment (seconds)
    pub setup_timeout_secs: u64,
    /// Whether ephemeral environments get pip installed
    pub venv_with_pip: bool,
    /// Parent directory for ephemeral environments (system temp dir if unset)
    pub work_root: Option<PathBuf>,
    /// Long-lived container GUI actions are executed in
    pub gui_target: String,
    /// Bound on each remote exec (seconds)
    pub bridge_timeout_secs: u64,
    /// Container runtime CLI
    pub docker_bin: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            pool_size: default_pool_size(),
            default_timeout_secs: DEFAULT_ACTION_TIMEOUT_SECS,
            outer_grace_secs: 5,
            setup_timeout_secs: 300,
            venv_with_pip: true,
            work_root: None,
            gui_target: "agent-gui".to_string(),
            bridge_timeout_secs: 120,
            docker_bin: "docker".to_string(),
        }
    }
}

impl SandboxConfig {
    /// Load configuration from the environment, keeping defaults for unset variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            python: std::env::var("ACTION_PYTHON").unwrap_or(defaults.python),
            pool_size: env_parse("ACTION_POOL_SIZE", defaults.pool_size).max(1),
            default_timeout_secs: env_parse(
                "ACTION_DEFAULT_TIMEOUT_SECS",
                defaults.default_timeout_secs,
            ),
            outer_grace_secs: env_parse("ACTION_OUTER_GRACE_SECS", defaults.outer_grace_secs),
            setup_timeout_secs: env_parse("ACTION_SETUP_TIMEOUT_SECS", defaults.setup_timeout_secs),
            venv_with_pip: env_flag("ACTION_VENV_WITH_PIP", defaults.venv_with_pip),
            work_root: std::env::var("ACTION_WORK_ROOT").ok().map(PathBuf::from),
            gui_target: std::env::var("GUI_TARGET_CONTAINER").unwrap_or(defaults.gui_target),
            bridge_timeout_secs: env_parse(
                "GUI_BRIDGE_TIMEOUT_SECS",
                defaults.bridge_timeout_secs,
            ),
            docker_bin: std::env::var("DOCKER_BIN").unwrap_or(defaults.docker_bin),
        }
    }

    pub fn outer_grace(&self) -> Duration {
        Duration::from_secs(self.outer_grace_secs)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid value for {}: {:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.default_timeout_secs, 1800);
        assert_eq!(config.outer_grace(), Duration::from_secs(5));
        assert_eq!(config.setup_timeout(), Duration::from_secs(300));
        assert!(config.venv_with_pip);
        assert!(config.pool_size >= 1);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("ACTION_SANDBOX_TEST_PARSE", "not-a-number");
        assert_eq!(env_parse("ACTION_SANDBOX_TEST_PARSE", 7u64), 7);
        std::env::set_var("ACTION_SANDBOX_TEST_PARSE", " 42 ");
        assert_eq!(env_parse("ACTION_SANDBOX_TEST_PARSE", 7u64), 42);
        std::env::remove_var("ACTION_SANDBOX_TEST_PARSE");
    }
}
