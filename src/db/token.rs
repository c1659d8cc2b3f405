//! Access-token credentials for token-authenticated databases.
//!
//! In token mode the connection carries no password; a short-lived token is
//! fetched from an external source at connect time and used as the
//! credential. Tokens are never logged.

use crate::error::{EngineError, EngineResult};
use std::path::PathBuf;

/// A fetched access token.
///
/// Deliberately opaque: no `Debug`/`Display` of the secret.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// The raw token, used as the connection credential.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Encode the token in the binary form ODBC-style driver layers expect:
    /// a 4-byte little-endian length prefix followed by the UTF-16LE bytes
    /// of the token.
    pub fn driver_attribute(&self) -> Vec<u8> {
        let payload: Vec<u8> = self
            .secret
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        let mut framed = Vec::with_capacity(4 + payload.len());
        framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        framed.extend_from_slice(&payload);
        framed
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("len", &self.secret.len())
            .finish_non_exhaustive()
    }
}

/// Where the token comes from. Fetched fresh on every connect attempt so a
/// rotated token is picked up without a restart.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// Read from an environment variable.
    Env(String),
    /// Read from a file (trailing whitespace trimmed).
    File(PathBuf),
}

impl TokenSource {
    pub async fn fetch(&self) -> EngineResult<AccessToken> {
        match self {
            TokenSource::Env(var) => {
                let value = std::env::var(var).map_err(|_| {
                    EngineError::configuration(
                        format!("Access token variable '{}' is not set", var),
                        "Export the token or switch to --auth-mode trusted",
                    )
                })?;
                if value.trim().is_empty() {
                    return Err(EngineError::configuration(
                        format!("Access token variable '{}' is empty", var),
                        "Provide a non-empty token value",
                    ));
                }
                Ok(AccessToken::new(value.trim().to_string()))
            }
            TokenSource::File(path) => {
                let value = tokio::fs::read_to_string(path).await.map_err(|e| {
                    EngineError::configuration(
                        format!("Failed to read token file {}: {}", path.display(), e),
                        "Check the --token-file path and permissions",
                    )
                })?;
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(EngineError::configuration(
                        format!("Token file {} is empty", path.display()),
                        "Provide a non-empty token value",
                    ));
                }
                Ok(AccessToken::new(trimmed.to_string()))
            }
        }
    }
}
