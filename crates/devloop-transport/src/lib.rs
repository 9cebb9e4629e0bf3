//! WebSocket session gateway.
//!
//! - `protocol` - wire messages between client and server
//! - `auth` - signed session credential verification
//! - `session` - one connection bound to at most one control loop
//! - `websocket` - axum upgrade handler and socket plumbing

pub mod auth;
pub mod protocol;
pub mod session;
pub mod websocket;

pub use auth::{CredentialError, mint_session_token, verify_session_token};
pub use protocol::{ClientMessage, ServerMessage};
pub use session::{BackendFactory, ConfigurationError, Gateway, ModelFactory, Session};
pub use websocket::router;
