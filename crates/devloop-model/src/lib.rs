//! Resilient chat-completion client.
//!
//! - `Message` / `Role` - chat message types
//! - `CompletionTransport` - the network completion primitive
//! - `HttpTransport` - OpenAI-compatible `POST /chat/completions`
//! - `RetryPolicy` - connectivity (linear) and rate-limit (full jitter)
//!   backoff configuration
//! - `ModelClient` - wraps a transport behind both retry policies

pub mod client;
pub mod message;
pub mod retry;
pub mod transport;

pub use client::ModelClient;
pub use message::{Message, Role};
pub use retry::RetryPolicy;
pub use transport::{Completion, CompletionTransport, HttpTransport, ModelError, TokenUsage};
