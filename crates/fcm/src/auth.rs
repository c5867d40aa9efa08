//! OAuth access tokens for the FCM v1 API.
//!
//! A service-account key signs an RS256 assertion which is exchanged at the
//! key's token endpoint. The access token is cached until shortly before it
//! expires.

use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{FcmError, Result};

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_SKEW_SECS: i64 = 60;

/// Fields of a Google service-account JSON key used here.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(raw)?;
        if key.client_email.trim().is_empty() || key.private_key.trim().is_empty() {
            return Err(FcmError::Credential(
                "service account key is missing client_email or private_key".to_string(),
            ));
        }
        Ok(key)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            FcmError::Credential(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at_unix: i64,
}

/// Where the client gets bearer tokens from.
pub enum Credentials {
    /// Exchange a signed assertion for short-lived tokens.
    ServiceAccount(ServiceAccountKey),
    /// A fixed bearer token (emulators, tests, externally refreshed tokens).
    Static(String),
}

/// Supplies bearer tokens, refreshing service-account tokens as they expire.
pub struct TokenProvider {
    credentials: Credentials,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            cache: Mutex::new(None),
        }
    }

    pub async fn access_token(&self, client: &reqwest::Client) -> Result<String> {
        let key = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::ServiceAccount(key) => key,
        };

        let mut cache = self.cache.lock().await;
        let now = Utc::now().timestamp();
        if let Some(cached) = cache.as_ref()
            && cached.expires_at_unix - TOKEN_REFRESH_SKEW_SECS > now
        {
            return Ok(cached.token.clone());
        }

        let assertion = sign_assertion(key, now)?;
        let response = client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read response body>".to_string());
            return Err(FcmError::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        debug!(expires_in = token.expires_in, "Obtained FCM access token");
        *cache = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at_unix: now + token.expires_in,
        });
        Ok(token.access_token)
    }
}

fn sign_assertion(key: &ServiceAccountKey, now: i64) -> Result<String> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: FCM_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
    Ok(jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        &claims,
        &encoding_key,
    )?)
}
