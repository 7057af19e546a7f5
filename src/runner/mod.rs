//! Runner module - Execution strategies
//!
//! This module provides a unified interface for running actions:
//! - `SandboxedRunner`: For untrusted action code (ephemeral environment per call)
//! - `TrustedRunner`: For first-party internal actions (no isolation)
//!
//! GUI-mode actions are forwarded to the remote bridge by both runners.
//!
//! The runner module does NOT:
//! - Validate action shape or pick a strategy
//! - Enforce the outer deadline
//! - Track in-flight invocations

pub mod sandboxed;
pub mod trusted;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::core::{Action, ActionResult, Result};
use crate::engine::pool::WorkerContext;

/// One call of one action
#[derive(Debug, Clone)]
pub struct Invocation {
    pub run_id: Uuid,
    pub action: Action,
    pub input: Value,
    /// Inner wall-clock timeout
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(action: Action, input: Value, default_timeout_secs: u64) -> Self {
        let timeout = Duration::from_secs(action.timeout_secs(default_timeout_secs));
        Self {
            run_id: Uuid::new_v4(),
            action,
            input,
            timeout,
        }
    }
}

/// Runner trait for executing one invocation
#[async_trait]
pub trait Runner: Send + Sync {
    /// Failures of the action's own code come back as `Ok` results; only
    /// infrastructure faults are `Err`.
    async fn run(&self, invocation: &Invocation, ctx: &WorkerContext) -> Result<ActionResult>;
}

// Re-exports
pub use sandboxed::SandboxedRunner;
pub use trusted::{InternalHandler, TrustedRunner};
