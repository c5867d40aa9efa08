//! FCM client error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FcmError>;

/// Errors that fail a whole send call (as opposed to per-token failures, which are
/// reported inside a [`crate::BatchResponse`]).
#[derive(Error, Debug)]
pub enum FcmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Token exchange failed with status {status}: {body}")]
    TokenExchange { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}
