//! Actions, observations and the session event envelope.

use serde::{Deserialize, Serialize};

/// A structured instruction the agent wants executed.
///
/// Produced only by the action extractor; immutable once constructed.
/// The `action` field on the wire is the discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// No-op turn. Never forwarded to the client.
    Null,
    /// Run a shell command, optionally in the background.
    Run {
        command: String,
        #[serde(default)]
        background: bool,
    },
    /// Kill a background command by id.
    Kill { id: u64 },
    /// Internal reasoning step.
    Think { thought: String },
    /// Say something to the user.
    Talk { content: String },
    /// The task is complete; terminates the control loop.
    Finish,
}

impl Action {
    /// Whether this is the designated null variant.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// The structured result of executing an [`Action`].
///
/// Produced by the command-execution backend (or the gateway for user
/// messages); the `observation` field is the discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "observation", rename_all = "snake_case")]
pub enum Observation {
    /// No-op result. Never forwarded to the client.
    Null,
    /// Output of a command run.
    CmdOutput {
        command_id: u64,
        command: String,
        exit_code: i32,
        output: String,
    },
    /// A free-text message from the user, appended to history.
    UserMessage { message: String },
    /// A failure that prevented progress.
    Error { message: String },
}

impl Observation {
    /// Whether this is the designated null variant.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One event produced by a control loop, in production order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentEvent {
    Action(Action),
    Observation(Observation),
}
