//! Firebase Cloud Messaging client.
//!
//! [`Messaging`] is the seam the rest of the system depends on: one multicast
//! call in, one result per token out. [`FcmClient`] implements it against the
//! HTTP v1 API; tests substitute their own implementation.

pub mod auth;
pub mod client;
pub mod error;
pub mod message;

pub use auth::{Credentials, ServiceAccountKey, TokenProvider};
pub use client::{FcmClient, FcmConfig};
pub use error::{FcmError, Result};
pub use message::{
    BatchResponse, MAX_MULTICAST_TOKENS, MessagingErrorCode, MulticastMessage, Notification,
    SendError, SendResponse,
};

use async_trait::async_trait;

/// Push delivery channel.
#[async_trait]
pub trait Messaging: Send + Sync {
    /// Send `message` to each of its tokens.
    ///
    /// Per-token failures are reported in the [`BatchResponse`], aligned with
    /// `message.tokens`. An `Err` means nothing could be attempted.
    async fn send_each_for_multicast(&self, message: &MulticastMessage) -> Result<BatchResponse>;
}
