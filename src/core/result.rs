//! Invocation results
//!
//! What a caller gets back from a completed action: captured process output,
//! a `{status, message}` failure, or the raw value an internal action returned.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Terminal status of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "success",
            Status::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Captured output of a sandboxed or CLI execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub status: Status,
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

impl ProcessOutput {
    /// Build from a finished child; status follows the exit code
    pub fn from_exit(returncode: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        let status = if returncode == 0 {
            Status::Success
        } else {
            Status::Error
        };
        Self {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
            returncode,
        }
    }

    /// A child that never produced a usable exit status
    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self::from_exit(-1, "", message)
    }

    /// The inner wall-clock timeout fired
    pub fn timed_out() -> Self {
        Self::launch_failure("Execution timed out")
    }
}

/// Status-plus-message result used by internal actions and the outer deadline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub status: Status,
    pub message: String,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
        }
    }
}

/// The single terminal result of an invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionResult {
    Process(ProcessOutput),
    Failure(Failure),
    /// Raw structured value returned by an internal action
    Value(Value),
}

impl ActionResult {
    pub fn failure(message: impl Into<String>) -> Self {
        ActionResult::Failure(Failure::new(message))
    }

    pub fn is_success(&self) -> bool {
        match self {
            ActionResult::Process(output) => output.status == Status::Success,
            ActionResult::Failure(_) => false,
            ActionResult::Value(value) => {
                value.get("status").and_then(Value::as_str) != Some("error")
            }
        }
    }

    /// Convert into the JSON shape handed back to the caller
    pub fn into_value(self) -> Value {
        match self {
            ActionResult::Value(value) => value,
            other => serde_json::to_value(&other).unwrap_or(Value::Null),
        }
    }
}

impl From<ProcessOutput> for ActionResult {
    fn from(output: ProcessOutput) -> Self {
        ActionResult::Process(output)
    }
}
