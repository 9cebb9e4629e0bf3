//! Wire protocol for client-server communication.

use serde::{Deserialize, Serialize};

use devloop_core::AgentEvent;

/// Message from client to server, discriminated by `action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Construct a fresh control loop with optional overrides.
    Initialize {
        #[serde(default)]
        args: InitializeArgs,
    },
    /// Start a task on the initialized control loop.
    Start {
        #[serde(default)]
        args: StartArgs,
    },
    /// Append a free-text user message to session history.
    Chat { args: ChatArgs },
}

/// Overrides for session construction. Anything omitted falls back to
/// the process defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeArgs {
    pub directory: Option<String>,
    #[serde(rename = "agent_cls")]
    pub agent: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub container_image: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartArgs {
    /// The task text. Optional on the wire so its absence can be
    /// reported as a protocol-level error rather than a parse failure.
    pub task: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatArgs {
    pub message: String,
}

/// Message from server to client.
///
/// Untagged: acks carry `action` + `message`, errors carry
/// `error: true`, agent events serialize with their own discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Event(AgentEvent),
    Ack { action: String, message: String },
    Error { error: bool, message: String },
    Info { message: String },
}

impl ServerMessage {
    /// The acknowledgement sent after a successful `initialize`.
    #[must_use]
    pub fn initialized() -> Self {
        Self::Ack {
            action: "initialize".to_string(),
            message: "Control loop started.".to_string(),
        }
    }

    /// An error event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: true,
            message: message.into(),
        }
    }

    /// An informational message.
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }
}
