//! Document shapes read and written by the relay.
//!
//! Field names follow the stored camelCase form. Reads are lenient: unknown
//! fields are ignored and most fields are optional, since the documents are
//! written by other services.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use docstore::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivery state of a notification record.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationStatus {
    #[default]
    Pending,
    /// Claimed by a dispatcher; the send is in progress.
    Processing,
    Sent,
}

/// A queued notification: the unit of work of a dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub title: String,
    pub body: String,
    /// Web deep link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: NotificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            link: None,
            mobile_link: None,
            created_by: None,
            created_at: None,
            status: NotificationStatus::Pending,
            sent_at: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_mobile_link(mut self, link: impl Into<String>) -> Self {
        self.mobile_link = Some(link.into());
        self
    }

    pub fn created_by(mut self, creator: impl Into<String>) -> Self {
        self.created_by = Some(creator.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

/// Field holding a recipient's device tokens.
pub const FCM_TOKENS_FIELD: &str = "fcmTokens";

/// Admin, organization user or resident profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub fcm_tokens: Vec<String>,
}

impl RecipientProfile {
    /// Read the token set from a raw profile body.
    ///
    /// Non-string and blank entries are ignored rather than failing the read;
    /// duplicates are dropped, keeping first occurrence order.
    pub fn tokens_from_fields(fields: &Fields) -> Vec<String> {
        let Some(Value::Array(values)) = fields.get(FCM_TOKENS_FIELD) else {
            return Vec::new();
        };
        let mut tokens: Vec<String> = Vec::with_capacity(values.len());
        for token in values.iter().filter_map(Value::as_str) {
            if !token.trim().is_empty() && !tokens.iter().any(|t| t == token) {
                tokens.push(token.to_string());
            }
        }
        tokens
    }
}

/// A title/body pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub title: String,
    pub body: String,
}

impl MessageTemplate {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Parse a stored template; `None` unless both title and body are non-empty strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        let title = value.get("title")?.as_str()?.trim();
        let body = value.get("body")?.as_str()?.trim();
        if title.is_empty() || body.is_empty() {
            return None;
        }
        Some(Self::new(title, body))
    }
}

/// Organization-level settings that influence notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Message overrides keyed by status (plus `review_request`). Entries are
    /// kept raw so one malformed entry does not hide the others.
    #[serde(default)]
    pub notification_settings: BTreeMap<String, Value>,
}

impl OrganizationSettings {
    pub fn template(&self, key: &str) -> Option<MessageTemplate> {
        self.notification_settings
            .get(key)
            .and_then(MessageTemplate::from_value)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Google Business location used to build review links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_place_id: Option<String>,
}

/// Documents that carry a workflow `status`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowKind {
    ServiceRequest,
    Violation,
}

impl WorkflowKind {
    /// Collection under an organization holding documents of this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::ServiceRequest => "serviceRequests",
            Self::Violation => "violations",
        }
    }
}

/// The fields of a service request or violation the relay reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub resident_id: Option<String>,
    #[serde(default)]
    pub reporter_id: Option<String>,
    /// Violation or request category.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_omits_absent_links() {
        let record = NotificationRecord::new("t", "b");
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("link").is_none());
        assert!(value.get("mobileLink").is_none());
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn record_reads_stored_shape() {
        let record: NotificationRecord = serde_json::from_value(json!({
            "title": "Hello",
            "body": "World",
            "mobileLink": "app://violations/v1",
            "createdBy": "system",
            "createdAt": "2024-05-01T10:00:00.000Z",
            "status": "sent",
            "unrelated": 1
        }))
        .unwrap();
        assert_eq!(record.mobile_link.as_deref(), Some("app://violations/v1"));
        assert_eq!(record.status, NotificationStatus::Sent);
        assert!(record.created_at.is_some());
    }

    #[test]
    fn tokens_are_deduplicated_and_filtered() {
        let fields = match json!({ "fcmTokens": ["a", "", 3, "b", "a"] }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert_eq!(RecipientProfile::tokens_from_fields(&fields), vec!["a", "b"]);
    }

    #[test]
    fn template_requires_title_and_body() {
        assert!(MessageTemplate::from_value(&json!({ "title": "t" })).is_none());
        assert!(MessageTemplate::from_value(&json!({ "title": "t", "body": "  " })).is_none());
        assert!(MessageTemplate::from_value(&json!("t")).is_none());
        assert_eq!(
            MessageTemplate::from_value(&json!({ "title": "t", "body": "b" })),
            Some(MessageTemplate::new("t", "b"))
        );
    }

    #[test]
    fn status_strings() {
        assert_eq!(NotificationStatus::Processing.as_ref(), "processing");
        assert_eq!(WorkflowKind::ServiceRequest.to_string(), "service_request");
    }
}
