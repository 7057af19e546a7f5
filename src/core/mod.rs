//! Core data contracts shared by every execution strategy

pub mod action;
pub mod error;
pub mod result;

pub use action::{
    Action, ActionType, ExecutionMode, InteractionMode, DEFAULT_ACTION_TIMEOUT_SECS,
    SWITCH_TO_CLI_ACTION,
};
pub use error::{ErrorKind, ExecutorError, Result};
pub use result::{ActionResult, Failure, ProcessOutput, Status};
