//! Per-session configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for one agent session.
///
/// Every field has a process-level default; the client can override any
/// of them in its `initialize` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Working directory for command execution.
    pub working_dir: PathBuf,
    /// Registry key of the agent variant to run.
    pub agent: String,
    /// Model name passed to the completion transport.
    pub model: String,
    /// API key for the model provider, if required.
    pub api_key: Option<String>,
    /// Base URL override for the model provider.
    pub api_base: Option<String>,
    /// Container image handed to the execution backend.
    pub container_image: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("workspace"),
            agent: "task".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_base: None,
            container_image: "ghcr.io/devloop/sandbox".to_string(),
        }
    }
}
