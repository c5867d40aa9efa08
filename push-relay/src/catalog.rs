//! Status messages: organization overrides over built-in defaults.

use crate::models::{MessageTemplate, OrganizationSettings, WorkflowKind};

/// Organization setting key for the review-request template.
pub const REVIEW_REQUEST_KEY: &str = "review_request";

/// Placeholder replaced by the generated review link.
pub const REVIEW_URL_PLACEHOLDER: &str = "{{reviewUrl}}";

/// Status that completes a service request.
pub const COMPLETE_STATUS: &str = "complete";

const REVIEW_URL_BASE: &str = "https://search.google.com/local/writereview?placeid=";

/// Built-in message for `status`, if that transition is user-facing.
pub fn default_template(kind: WorkflowKind, status: &str) -> Option<MessageTemplate> {
    let (title, body) = match (kind, status) {
        (WorkflowKind::ServiceRequest, "acknowledged") => (
            "Service request received",
            "Your service request has been acknowledged by management.",
        ),
        (WorkflowKind::ServiceRequest, "in_progress") => (
            "Service request in progress",
            "Work on your service request has started.",
        ),
        (WorkflowKind::ServiceRequest, "on_hold") => (
            "Service request on hold",
            "Your service request is on hold. Management will follow up with you.",
        ),
        (WorkflowKind::ServiceRequest, COMPLETE_STATUS) => (
            "Service request completed",
            "Your service request has been completed.",
        ),
        (WorkflowKind::ServiceRequest, "cancelled") => (
            "Service request cancelled",
            "Your service request has been cancelled.",
        ),
        (WorkflowKind::Violation, "pending_acknowledgement") => (
            "New violation notice",
            "A violation has been reported for your vehicle. Please acknowledge it.",
        ),
        (WorkflowKind::Violation, "acknowledged") => (
            "Violation acknowledged",
            "Your violation notice has been acknowledged.",
        ),
        (WorkflowKind::Violation, "pending_tow") => (
            "Vehicle scheduled for tow",
            "A vehicle linked to your unit is scheduled to be towed.",
        ),
        (WorkflowKind::Violation, "towed") => (
            "Vehicle towed",
            "A vehicle linked to your unit has been towed.",
        ),
        (WorkflowKind::Violation, "resolved") => (
            "Violation resolved",
            "Your violation has been resolved.",
        ),
        (WorkflowKind::Violation, "dismissed") => (
            "Violation dismissed",
            "Your violation has been dismissed.",
        ),
        _ => return None,
    };
    Some(MessageTemplate::new(title, body))
}

/// Message for `status`: the organization's override when it has a complete
/// title/body pair, else the default, else `None`.
pub fn resolve_template(
    settings: Option<&OrganizationSettings>,
    kind: WorkflowKind,
    status: &str,
) -> Option<MessageTemplate> {
    settings
        .and_then(|s| s.template(status))
        .or_else(|| default_template(kind, status))
}

/// Google "write a review" link for a place.
pub fn review_url(place_id: &str) -> String {
    format!("{}{}", REVIEW_URL_BASE, place_id)
}

/// Substitute the review link into a template.
pub fn render_review_request(template: &MessageTemplate, url: &str) -> MessageTemplate {
    MessageTemplate::new(
        template.title.replace(REVIEW_URL_PLACEHOLDER, url),
        template.body.replace(REVIEW_URL_PLACEHOLDER, url),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: serde_json::Value) -> OrganizationSettings {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn override_wins_over_default() {
        let org = settings(json!({
            "notificationSettings": {
                "complete": { "title": "All done", "body": "We fixed it" }
            }
        }));
        let template = resolve_template(Some(&org), WorkflowKind::ServiceRequest, "complete");
        assert_eq!(template, Some(MessageTemplate::new("All done", "We fixed it")));
    }

    #[test]
    fn incomplete_override_falls_back() {
        let org = settings(json!({
            "notificationSettings": { "complete": { "title": "Only a title" } }
        }));
        let template =
            resolve_template(Some(&org), WorkflowKind::ServiceRequest, "complete").unwrap();
        assert_eq!(template.title, "Service request completed");
    }

    #[test]
    fn unknown_status_has_no_message() {
        assert!(resolve_template(None, WorkflowKind::Violation, "reported").is_none());
        assert!(resolve_template(None, WorkflowKind::ServiceRequest, "submitted").is_none());
    }

    #[test]
    fn review_placeholder_substitution() {
        let template = MessageTemplate::new("How did we do?", "Leave a review: {{reviewUrl}}");
        let rendered = render_review_request(&template, &review_url("ChIJ123"));
        assert_eq!(
            rendered.body,
            "Leave a review: https://search.google.com/local/writereview?placeid=ChIJ123"
        );
        assert_eq!(rendered.title, "How did we do?");
    }
}
