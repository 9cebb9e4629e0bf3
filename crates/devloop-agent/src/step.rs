//! One agent step: a single completion followed by a single extraction.

use thiserror::Error;

use devloop_core::{Action, UsageMeter};
use devloop_model::{Message, ModelClient, ModelError};

use crate::{ExtractError, extract};

/// Failure of one step. Model and extractor errors propagate unchanged;
/// the session layer decides what happens next.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Malformed(#[from] ExtractError),
}

/// Produces exactly one action per invocation: renders nothing itself,
/// issues one model call, and feeds the reply through the extractor.
pub struct AgentStep {
    model: ModelClient,
}

impl AgentStep {
    #[must_use]
    pub fn new(model: ModelClient) -> Self {
        Self { model }
    }

    /// Run one step over an already-rendered prompt.
    ///
    /// The usage meter is updated as soon as the reply arrives, so the
    /// characters are accounted even when extraction fails afterwards.
    ///
    /// # Errors
    /// Propagates [`ModelError`] and [`ExtractError`] unchanged.
    pub async fn run(&self, prompt: &str, usage: &UsageMeter) -> Result<Action, StepError> {
        let reply = self.model.complete(&[Message::user(prompt)]).await?;
        usage.add_chars(prompt.len() + reply.len());
        let action = extract(&reply)?;
        tracing::debug!(?action, "extracted action");
        Ok(action)
    }
}
