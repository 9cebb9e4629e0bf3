//! Structured-action extraction from raw model text.

use serde::Deserialize;
use thiserror::Error;

use devloop_core::Action;

/// Malformed-output failure from [`extract`].
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no complete JSON object found in model reply")]
    NoJsonFound,
    #[error("first JSON object in model reply is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("JSON object is not a recognized action: {0}")]
    InvalidAction(#[source] serde_json::Error),
}

/// Recover exactly one [`Action`] from a raw model reply.
///
/// Scans left to right tracking brace depth. The first complete
/// top-level `{...}` is parsed immediately; if that parse fails the
/// whole extraction fails (first-object-wins, no fallback to later
/// candidates). The depth counter is deliberately unaware of string and
/// escape context, and an unmatched `}` drives it negative, which
/// suppresses any later candidate - both quirks are part of the
/// compatibility contract with varied model output.
///
/// # Errors
/// [`ExtractError`] when no valid action can be recovered.
pub fn extract(raw: &str) -> Result<Action, ExtractError> {
    let mut depth: i64 = 0;
    let mut start: Option<usize> = None;

    for (i, ch) in raw.char_indices() {
        if ch == '{' {
            if depth == 0 {
                start = Some(i);
            }
            depth += 1;
        } else if ch == '}' {
            depth -= 1;
            if depth == 0 {
                if let Some(s) = start {
                    let candidate = &raw[s..=i];
                    let value: serde_json::Value =
                        serde_json::from_str(candidate).map_err(ExtractError::InvalidJson)?;
                    return Action::deserialize(value).map_err(ExtractError::InvalidAction);
                }
            }
        }
    }

    Err(ExtractError::NoJsonFound)
}
