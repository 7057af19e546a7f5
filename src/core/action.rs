//! Action descriptor as delivered by the action catalog

use serde::{Deserialize, Serialize};
use std::fmt;

/// Timeout applied when a descriptor carries none (seconds)
pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 1800;

/// Name of the internal action that is allowed to run locally while in GUI mode
pub const SWITCH_TO_CLI_ACTION: &str = "switch to CLI mode";

/// How an action is executed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExecutionMode {
    /// Trusted, first-party action run without isolation
    Internal,
    /// Untrusted action run in an ephemeral environment on the worker pool
    #[default]
    Sandboxed,
    /// Anything else the catalog sent; rejected by the executor
    Other(String),
}

impl From<String> for ExecutionMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "internal" => ExecutionMode::Internal,
            "sandboxed" => ExecutionMode::Sandboxed,
            _ => ExecutionMode::Other(value),
        }
    }
}

impl From<ExecutionMode> for String {
    fn from(mode: ExecutionMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Internal => "internal",
            ExecutionMode::Sandboxed => "sandboxed",
            ExecutionMode::Other(other) => other.as_str(),
        };
        write!(f, "{}", s)
    }
}

/// Where the action interacts: a terminal or a remote desktop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InteractionMode {
    #[default]
    #[serde(rename = "CLI")]
    Cli,
    #[serde(rename = "GUI")]
    Gui,
}

/// Shape of the action
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    #[default]
    Atomic,
    /// Composite or unknown action types
    Other(String),
}

impl From<String> for ActionType {
    fn from(value: String) -> Self {
        if value == "atomic" {
            ActionType::Atomic
        } else {
            ActionType::Other(value)
        }
    }
}

impl From<ActionType> for String {
    fn from(action_type: ActionType) -> Self {
        action_type.to_string()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Atomic => write!(f, "atomic"),
            ActionType::Other(other) => write!(f, "{}", other),
        }
    }
}

/// A single tool invocation the agent may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    /// Source text defining the entry point (or, legacy, binding `output`)
    pub code: String,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub mode: InteractionMode,
    #[serde(default)]
    pub action_type: ActionType,
    /// Per-call timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Action {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            execution_mode: ExecutionMode::default(),
            mode: InteractionMode::default(),
            action_type: ActionType::default(),
            timeout: None,
        }
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_mode(mut self, mode: InteractionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_action_type(mut self, action_type: ActionType) -> Self {
        self.action_type = action_type;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }

    /// Timeout in seconds, falling back to `default_secs`
    pub fn timeout_secs(&self, default_secs: u64) -> u64 {
        self.timeout.unwrap_or(default_secs)
    }

    pub fn is_atomic(&self) -> bool {
        self.action_type == ActionType::Atomic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let action: Action =
            serde_json::from_str(r#"{"name":"echo","code":"def handle(d): return d"}"#).unwrap();

        assert_eq!(action.execution_mode, ExecutionMode::Sandboxed);
        assert_eq!(action.mode, InteractionMode::Cli);
        assert_eq!(action.action_type, ActionType::Atomic);
        assert_eq!(action.timeout_secs(DEFAULT_ACTION_TIMEOUT_SECS), 1800);
    }

    #[test]
    fn test_descriptor_full() {
        let action: Action = serde_json::from_str(
            r#"{"name":"click","code":"","execution_mode":"internal","mode":"GUI","action_type":"composite","timeout":30}"#,
        )
        .unwrap();

        assert_eq!(action.execution_mode, ExecutionMode::Internal);
        assert_eq!(action.mode, InteractionMode::Gui);
        assert_eq!(action.action_type, ActionType::Other("composite".into()));
        assert!(!action.is_atomic());
        assert_eq!(action.timeout_secs(1800), 30);
    }

    #[test]
    fn test_unknown_execution_mode_is_preserved() {
        let action: Action =
            serde_json::from_str(r#"{"name":"x","code":"","execution_mode":"remote"}"#).unwrap();
        assert_eq!(action.execution_mode, ExecutionMode::Other("remote".into()));
        assert_eq!(action.execution_mode.to_string(), "remote");
    }
}
