//! Outbound push payloads.

use std::collections::BTreeMap;

use fcm::MulticastMessage;

use crate::models::NotificationRecord;

pub const LINK_KEY: &str = "link";
pub const MOBILE_LINK_KEY: &str = "mobileLink";

/// Data map carrying whichever deep links are present.
///
/// The provider rejects null values, so a missing or empty link produces no
/// key at all.
pub fn link_data(link: Option<&str>, mobile_link: Option<&str>) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    for (key, value) in [(LINK_KEY, link), (MOBILE_LINK_KEY, mobile_link)] {
        if let Some(value) = value
            && !value.is_empty()
        {
            data.insert(key.to_string(), value.to_string());
        }
    }
    data
}

/// Multicast envelope for a notification record.
pub fn build_message(record: &NotificationRecord, tokens: Vec<String>) -> MulticastMessage {
    MulticastMessage::new(tokens, record.title.clone(), record.body.clone()).with_data(link_data(
        record.link.as_deref(),
        record.mobile_link.as_deref(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_links_are_absent_keys() {
        let record = NotificationRecord::new("Hi", "There");
        let message = build_message(&record, vec!["t".to_string()]);
        assert!(message.data.is_empty());

        let serialized = serde_json::to_value(&message).unwrap();
        assert!(serialized.get("data").is_none());
    }

    #[test]
    fn present_links_are_carried() {
        let record = NotificationRecord::new("Hi", "There")
            .with_link("/requests/1")
            .with_mobile_link("");
        let message = build_message(&record, vec!["t".to_string()]);
        assert_eq!(message.data.get(LINK_KEY).map(String::as_str), Some("/requests/1"));
        assert!(!message.data.contains_key(MOBILE_LINK_KEY));
        assert_eq!(message.notification.title, "Hi");
    }
}
