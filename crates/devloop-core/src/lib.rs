//! Core abstractions for devloop agent sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Action` / `Observation` / `AgentEvent` - the closed event model
//! - `EventStream` - Broadcast + history for session event delivery
//! - `SessionConfig` - Per-session configuration with process defaults
//! - `CommandManager` trait - the command-execution collaborator boundary
//! - `UsageMeter` - running character accounting for cost observability

pub mod config;
pub mod event;
pub mod stream;
pub mod traits;

pub use config::SessionConfig;
pub use event::{Action, AgentEvent, Observation};
pub use stream::EventStream;
pub use traits::{CommandManager, UsageMeter};
