//! Error taxonomy for the upstream API client.
//!
//! Every client method returns `Result<_, ClientError>` — one contract for
//! all operations, so callers can match on the failure class instead of
//! parsing message strings. Handler- and CLI-level code wraps these in
//! `anyhow` at the boundary.

use thiserror::Error;

/// Failure classes for upstream API operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Credential exchange was rejected, or no access token is held.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The organization has no storage connection for the configured provider.
    #[error("no {provider} connection found for this organization")]
    NoConnection { provider: String },

    /// A required session field has not been resolved yet. Raised before
    /// any network I/O so a malformed request is never issued.
    #[error("{field} is not resolved yet (login first)")]
    Precondition { field: &'static str },

    /// The upstream service answered with a non-2xx status.
    #[error("upstream returned {status}: {detail}")]
    Upstream { status: u16, detail: String },

    /// The response body was not the JSON shape we expected.
    #[error("unexpected response body: {0}")]
    Parse(String),

    /// The HTTP request itself failed (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    /// Shorthand for a missing-session-field error.
    pub fn precondition(field: &'static str) -> Self {
        ClientError::Precondition { field }
    }
}

/// Result alias used by every client operation.
pub type ClientResult<T> = Result<T, ClientError>;
