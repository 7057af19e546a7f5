//! Action execution and sandboxing engine
//!
//! Runs agent actions either trusted in-process, isolated in a throwaway
//! interpreter environment on a bounded worker pool, or inside a remote GUI
//! container. Failures of the action's own code come back as data; failures
//! of the engine's infrastructure are raised as [`ExecutorError`].

pub mod bridge;
pub mod core;
pub mod engine;
pub mod runner;
pub mod sandbox;

pub use crate::core::{Action, ActionResult, ErrorKind, ExecutionMode, ExecutorError, InteractionMode};
pub use crate::engine::ActionExecutor;
pub use crate::runner::InternalHandler;
pub use crate::sandbox::SandboxConfig;
