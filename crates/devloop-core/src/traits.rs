//! Collaborator traits and usage accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::Observation;

/// The command-execution backend consumed by the control loop.
///
/// Execution failures cross this boundary as [`Observation::Error`]
/// values, not as Rust errors: the loop forwards whatever the backend
/// observed and keeps running.
#[async_trait]
pub trait CommandManager: Send + Sync {
    /// Run a command, optionally in the background.
    async fn run(&self, command: &str, background: bool) -> Observation;

    /// Kill a background command by id.
    async fn kill(&self, id: u64) -> Observation;
}

/// Running character count over prompts and replies.
///
/// Updated by the agent step for every model exchange, including
/// exchanges whose reply later fails extraction.
#[derive(Debug, Default)]
pub struct UsageMeter {
    chars: AtomicU64,
}

impl UsageMeter {
    /// Account for `n` additional characters.
    pub fn add_chars(&self, n: usize) {
        self.chars.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Total characters accounted so far.
    #[must_use]
    pub fn chars(&self) -> u64 {
        self.chars.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_accumulates() {
        let meter = UsageMeter::default();
        meter.add_chars(10);
        meter.add_chars(5);
        assert_eq!(meter.chars(), 15);
    }
}
