//! Model client: one completion call behind both retry policies.

use std::sync::Arc;

use crate::{Message, ModelError, RetryPolicy, transport::CompletionTransport};

/// Chat-completion client with uniform retry/backoff behavior.
///
/// The two policies compose in a fixed outer→inner order: the
/// connectivity loop wraps the rate-limit loop, which wraps the single
/// transport attempt. Retrying is safe here because a completion is a
/// read, not a mutation; no externally visible action is duplicated.
#[derive(Clone)]
pub struct ModelClient {
    transport: Arc<dyn CompletionTransport>,
    policy: RetryPolicy,
}

impl ModelClient {
    /// Wrap a transport with the given retry policy.
    #[must_use]
    pub fn new(transport: Arc<dyn CompletionTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Run a completion, retrying transient failures per the policy.
    ///
    /// # Errors
    /// Surfaces the last transport error once attempts are exhausted;
    /// protocol errors propagate immediately.
    pub async fn complete(&self, messages: &[Message]) -> Result<String, ModelError> {
        let mut attempt = 1u32;
        loop {
            match self.complete_rate_limited(messages).await {
                Err(ModelError::Connectivity(reason)) if attempt < self.policy.max_attempts => {
                    let wait = self.policy.connectivity_wait(attempt);
                    tracing::info!(
                        attempt,
                        wait_secs = wait.as_secs_f64(),
                        %reason,
                        "connection error, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Inner loop: jittered retries for rate-limit (and, when
    /// configured, service) errors.
    async fn complete_rate_limited(&self, messages: &[Message]) -> Result<String, ModelError> {
        let mut attempt = 1u32;
        loop {
            match self.transport.complete(messages).await {
                Ok(completion) => {
                    if let Some(usage) = completion.usage {
                        tracing::debug!(
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            "completion ok"
                        );
                    }
                    return Ok(completion.content);
                }
                Err(err)
                    if self.policy.retries_with_jitter(&err)
                        && attempt < self.policy.max_attempts =>
                {
                    let wait = self.policy.rate_limit_wait(attempt);
                    tracing::info!(
                        attempt,
                        wait_secs = wait.as_secs_f64(),
                        error = %err,
                        "throttled, backing off with jitter"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
