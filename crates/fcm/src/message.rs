//! Multicast message model and per-token results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FcmError, Result};

/// Provider limit on tokens per multicast call.
pub const MAX_MULTICAST_TOKENS: usize = 500;

/// User-visible notification block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// One message addressed to many device tokens.
///
/// `data` values are strings; the provider rejects null or non-string values, so
/// optional entries must be left out rather than set to an empty marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastMessage {
    pub tokens: Vec<String>,
    pub notification: Notification,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl MulticastMessage {
    pub fn new(tokens: Vec<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            tokens,
            notification: Notification {
                title: title.into(),
                body: body.into(),
            },
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, data: BTreeMap<String, String>) -> Self {
        self.data = data;
        self
    }

    /// Check the token list against the provider's constraints.
    pub fn validate(&self) -> Result<()> {
        if self.tokens.is_empty() {
            return Err(FcmError::InvalidMessage(
                "tokens must be a non-empty list".to_string(),
            ));
        }
        if self.tokens.len() > MAX_MULTICAST_TOKENS {
            return Err(FcmError::InvalidMessage(format!(
                "tokens list must not contain more than {} items",
                MAX_MULTICAST_TOKENS
            )));
        }
        Ok(())
    }
}

/// Provider error codes reported per token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessagingErrorCode {
    RegistrationTokenNotRegistered,
    InvalidRegistrationToken,
    InvalidArgument,
    QuotaExceeded,
    Unavailable,
    InternalError,
    ThirdPartyAuthError,
    SenderIdMismatch,
    Unknown,
}

impl MessagingErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegistrationTokenNotRegistered => "messaging/registration-token-not-registered",
            Self::InvalidRegistrationToken => "messaging/invalid-registration-token",
            Self::InvalidArgument => "messaging/invalid-argument",
            Self::QuotaExceeded => "messaging/quota-exceeded",
            Self::Unavailable => "messaging/unavailable",
            Self::InternalError => "messaging/internal-error",
            Self::ThirdPartyAuthError => "messaging/third-party-auth-error",
            Self::SenderIdMismatch => "messaging/sender-id-mismatch",
            Self::Unknown => "messaging/unknown-error",
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "messaging/registration-token-not-registered" => Self::RegistrationTokenNotRegistered,
            "messaging/invalid-registration-token" => Self::InvalidRegistrationToken,
            "messaging/invalid-argument" => Self::InvalidArgument,
            "messaging/quota-exceeded" => Self::QuotaExceeded,
            "messaging/unavailable" => Self::Unavailable,
            "messaging/internal-error" => Self::InternalError,
            "messaging/third-party-auth-error" => Self::ThirdPartyAuthError,
            "messaging/sender-id-mismatch" => Self::SenderIdMismatch,
            _ => Self::Unknown,
        }
    }

    /// The token will never be deliverable again and should be dropped.
    pub fn is_permanent_token_failure(&self) -> bool {
        matches!(
            self,
            Self::RegistrationTokenNotRegistered | Self::InvalidRegistrationToken
        )
    }
}

impl fmt::Display for MessagingErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure details for a single token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendError {
    pub code: MessagingErrorCode,
    pub message: String,
}

/// Outcome of delivering to one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    pub message_id: Option<String>,
    pub error: Option<SendError>,
}

impl SendResponse {
    pub fn success(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failure(code: MessagingErrorCode, message: impl Into<String>) -> Self {
        Self {
            message_id: None,
            error: Some(SendError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-token results of a multicast send, in the order of the input tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub responses: Vec<SendResponse>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl BatchResponse {
    pub fn new(responses: Vec<SendResponse>) -> Self {
        let success_count = responses.iter().filter(|r| r.is_success()).count();
        let failure_count = responses.len() - success_count;
        Self {
            responses,
            success_count,
            failure_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_codes() {
        assert!(MessagingErrorCode::RegistrationTokenNotRegistered.is_permanent_token_failure());
        assert!(MessagingErrorCode::InvalidRegistrationToken.is_permanent_token_failure());
        assert!(!MessagingErrorCode::Unavailable.is_permanent_token_failure());
        assert!(!MessagingErrorCode::InvalidArgument.is_permanent_token_failure());
    }

    #[test]
    fn code_strings_round_trip() {
        let code = MessagingErrorCode::parse("messaging/registration-token-not-registered");
        assert_eq!(code, MessagingErrorCode::RegistrationTokenNotRegistered);
        assert_eq!(MessagingErrorCode::parse("nope"), MessagingErrorCode::Unknown);
    }

    #[test]
    fn validate_limits_tokens() {
        let empty = MulticastMessage::new(vec![], "t", "b");
        assert!(empty.validate().is_err());

        let tokens = (0..=MAX_MULTICAST_TOKENS).map(|i| format!("t{i}")).collect();
        let oversized = MulticastMessage::new(tokens, "t", "b");
        assert!(oversized.validate().is_err());
    }

    #[test]
    fn batch_counts() {
        let batch = BatchResponse::new(vec![
            SendResponse::success("m1"),
            SendResponse::failure(MessagingErrorCode::Unavailable, "try later"),
        ]);
        assert_eq!(batch.success_count, 1);
        assert_eq!(batch.failure_count, 1);
    }
}
