//! Per-session control loop.
//!
//! `ControlLoop` owns the long-lived task driving repeated
//! step → apply → observe cycles for one session.

pub mod control;

pub use control::{ControlError, ControlLoop, LoopState};
