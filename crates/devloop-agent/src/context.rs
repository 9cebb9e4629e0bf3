//! Ephemeral prompt context.

use devloop_core::{Action, Observation};

/// Caller-constructed snapshot of accumulated session state, used to
/// render exactly one prompt. Not persisted beyond a single step.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// The task the session was started with.
    pub task: String,
    /// Action/observation pairs accumulated so far, oldest first.
    pub history: Vec<(Action, Observation)>,
    /// Names of delegate agents available in the registry.
    pub delegates: Vec<String>,
}

impl PromptContext {
    /// Latest free-text user message in the history, if any.
    #[must_use]
    pub fn latest_user_message(&self) -> Option<&str> {
        self.history.iter().rev().find_map(|(_, obs)| match obs {
            Observation::UserMessage { message } => Some(message.as_str()),
            _ => None,
        })
    }
}
