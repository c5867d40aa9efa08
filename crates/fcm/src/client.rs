//! HTTP v1 client.
//!
//! The v1 API accepts one token per request, so a multicast is fanned out as
//! concurrent single sends (bounded by `concurrency`) and the results are
//! reassembled in input order.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::Messaging;
use crate::auth::TokenProvider;
use crate::error::Result;
use crate::message::{BatchResponse, MessagingErrorCode, MulticastMessage, SendResponse};

const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com/";
const DEFAULT_CONCURRENCY: usize = 16;
const DEFAULT_TIMEOUT_SECS: u64 = 15;
const FCM_ERROR_TYPE: &str = "type.googleapis.com/google.firebase.fcm.v1.FcmError";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub project_id: String,
    /// Base URL of the API; overridable for emulators.
    pub endpoint: String,
    /// Maximum in-flight single sends per multicast.
    pub concurrency: usize,
    pub timeout: Duration,
}

impl FcmConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct SendSuccess {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<Value>,
}

/// FCM HTTP v1 client.
pub struct FcmClient {
    config: FcmConfig,
    send_url: Url,
    client: reqwest::Client,
    tokens: TokenProvider,
}

impl FcmClient {
    pub fn new(config: FcmConfig, tokens: TokenProvider) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let send_url = Url::parse(&config.endpoint)?
            .join(&format!("v1/projects/{}/messages:send", config.project_id))?;
        Ok(Self {
            config,
            send_url,
            client,
            tokens,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    fn build_body(message: &MulticastMessage, token: &str) -> Value {
        let mut inner = json!({
            "token": token,
            "notification": {
                "title": message.notification.title,
                "body": message.notification.body,
            },
        });
        if !message.data.is_empty() {
            inner["data"] = json!(message.data);
        }
        json!({ "message": inner })
    }

    async fn send_one(&self, bearer: &str, message: &MulticastMessage, token: &str) -> SendResponse {
        let response = match self
            .client
            .post(self.send_url.clone())
            .bearer_auth(bearer)
            .json(&Self::build_body(message, token))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return SendResponse::failure(
                    MessagingErrorCode::Unavailable,
                    format!("request failed: {}", e),
                );
            }
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<SendSuccess>().await {
                Ok(ok) => SendResponse::success(ok.name),
                Err(e) => SendResponse::failure(
                    MessagingErrorCode::Unknown,
                    format!("unreadable success response: {}", e),
                ),
            };
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => {
                let code = classify_error(status.as_u16(), &envelope.error);
                SendResponse::failure(code, envelope.error.message)
            }
            Err(_) => SendResponse::failure(
                code_from_http_status(status.as_u16()),
                format!("HTTP {}: {}", status, truncate(&body, 300)),
            ),
        }
    }
}

#[async_trait]
impl Messaging for FcmClient {
    async fn send_each_for_multicast(&self, message: &MulticastMessage) -> Result<BatchResponse> {
        message.validate()?;
        let bearer = self.tokens.access_token(&self.client).await?;

        let responses: Vec<SendResponse> = stream::iter(message.tokens.clone())
            .map(|token| {
                let bearer = bearer.clone();
                async move { self.send_one(&bearer, message, &token).await }
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let batch = BatchResponse::new(responses);
        if batch.failure_count > 0 {
            warn!(
                success = batch.success_count,
                failure = batch.failure_count,
                "Multicast completed with failures"
            );
        } else {
            debug!(success = batch.success_count, "Multicast delivered");
        }
        Ok(batch)
    }
}

/// Map an API error to a provider code, preferring the FCM-specific detail.
fn classify_error(http_status: u16, error: &ErrorBody) -> MessagingErrorCode {
    let fcm_code = error.details.iter().find_map(|detail| {
        let is_fcm = detail.get("@type").and_then(Value::as_str) == Some(FCM_ERROR_TYPE);
        if is_fcm {
            detail.get("errorCode").and_then(Value::as_str)
        } else {
            None
        }
    });

    match fcm_code.unwrap_or(error.status.as_str()) {
        "UNREGISTERED" | "NOT_FOUND" => MessagingErrorCode::RegistrationTokenNotRegistered,
        "INVALID_ARGUMENT" => {
            if error.message.to_ascii_lowercase().contains("registration token") {
                MessagingErrorCode::InvalidRegistrationToken
            } else {
                MessagingErrorCode::InvalidArgument
            }
        }
        "SENDER_ID_MISMATCH" => MessagingErrorCode::SenderIdMismatch,
        "QUOTA_EXCEEDED" | "RESOURCE_EXHAUSTED" => MessagingErrorCode::QuotaExceeded,
        "UNAVAILABLE" => MessagingErrorCode::Unavailable,
        "INTERNAL" => MessagingErrorCode::InternalError,
        "THIRD_PARTY_AUTH_ERROR" => MessagingErrorCode::ThirdPartyAuthError,
        _ => code_from_http_status(http_status),
    }
}

fn code_from_http_status(status: u16) -> MessagingErrorCode {
    match status {
        400 => MessagingErrorCode::InvalidArgument,
        404 => MessagingErrorCode::RegistrationTokenNotRegistered,
        429 => MessagingErrorCode::QuotaExceeded,
        500 => MessagingErrorCode::InternalError,
        503 => MessagingErrorCode::Unavailable,
        _ => MessagingErrorCode::Unknown,
    }
}

fn truncate(input: &str, max_chars: usize) -> String {
    let mut out: String = input.chars().take(max_chars).collect();
    if input.chars().count() > max_chars {
        out.push('…');
    }
    out
}
