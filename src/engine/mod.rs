//! Engine module - Scheduling and process control
//!
//! - `process`: child processes with capture, hard timeout and group kill
//! - `pool`: bounded worker pool with child-scoped environment
//! - `executor`: the action orchestrator

pub mod executor;
pub mod pool;
pub mod process;

pub use executor::ActionExecutor;
pub use pool::{PoolTask, WorkerContext, WorkerPool};
pub use process::{run_process, Captured, CommandSpec, ProcessExit};
