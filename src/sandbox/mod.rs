//! Sandbox module - Ephemeral environment building blocks
//!
//! This module handles:
//! - Configuration loaded from the environment
//! - Ephemeral environment creation and removal
//! - Rendering the generated action script
//!
//! The sandbox module does NOT:
//! - Decide which strategy runs an action (that's the executor's job)
//! - Talk to remote targets

pub mod config;
pub mod environment;
pub mod harness;

// Re-exports for convenience
pub use config::SandboxConfig;
pub use environment::{EnvironmentSpec, EphemeralEnvironment};
pub use harness::{render, render_with_prelude, HarnessMode, ENTRY_POINT_NAME};
