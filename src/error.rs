//! Error types for dexgate

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for dexgate
pub type Result<T> = std::result::Result<T, Error>;

/// dexgate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No route matches the request path
    #[error("No route for path: {0}")]
    RouteNotFound(String),

    /// Upstream request failed (connect error, timeout, bad gateway)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Bearer token fetch or parse failure
    #[error("Token error: {0}")]
    Token(String),

    /// A step of the Dex login handshake did not produce its artifact
    #[error("Handshake failed at {step}: {reason}")]
    Handshake {
        /// Which step aborted (state, login-form, credentials, approval, session)
        step: String,
        /// What was missing or malformed
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a handshake error for a named step
    pub fn handshake(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Handshake {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status the proxy reports for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) | Self::Http(_) | Self::Token(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
