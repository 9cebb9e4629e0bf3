//! Signed session credentials.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Credential failure. Fatal for the connection: the gateway closes the
/// socket without any protocol exchange.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("missing session token")]
    Missing,
    #[error("invalid session token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sid: String,
}

/// Verify an HS256 session token and return its session id claim.
///
/// Tokens carry only `{sid}`; expiry validation is deliberately off.
///
/// # Errors
/// [`CredentialError`] when the token is absent, malformed, or signed
/// with a different secret.
pub fn verify_session_token(token: Option<&str>, secret: &[u8]) -> Result<String, CredentialError> {
    let token = token.ok_or(CredentialError::Missing)?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(CredentialError::Invalid)?;
    Ok(data.claims.sid)
}

/// Mint a session token for `sid`.
///
/// # Errors
/// Propagates signing failures from the underlying JWT library.
pub fn mint_session_token(sid: &str, secret: &[u8]) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::default(),
        &Claims {
            sid: sid.to_string(),
        },
        &EncodingKey::from_secret(secret),
    )
}
