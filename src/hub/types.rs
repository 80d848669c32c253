use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message pushed by the notification endpoint, classified by its `type` field.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Notification(Notification),
    /// Any other message type, dropped by the hub
    #[serde(other)]
    Other,
}

/// A user-facing notification. The payload is opaque to this crate.
#[non_exhaustive]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Who triggered the notification
    #[serde(default)]
    pub sender: Value,
    /// What happened
    #[serde(default)]
    pub data: Value,
    /// Remaining fields, kept as sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn notification_keeps_unknown_fields() {
        let message: InboundMessage = serde_json::from_value(json!({
            "type": "notification",
            "sender": {"id": 3, "name": "Ana"},
            "data": {"kind": "like", "post_id": 9},
            "id": 77
        }))
        .unwrap();

        let InboundMessage::Notification(notification) = message else {
            panic!("expected a notification, got {message:?}");
        };
        assert_eq!(notification.sender["name"], "Ana");
        assert_eq!(notification.data["post_id"], 9);
        assert_eq!(notification.extra["id"], 77);
        assert!(!notification.extra.contains_key("type"));
    }

    #[test]
    fn other_types_are_classified_as_other() {
        let message: InboundMessage =
            serde_json::from_value(json!({"type": "keepalive"})).unwrap();

        assert_eq!(message, InboundMessage::Other);
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let message: InboundMessage =
            serde_json::from_value(json!({"type": "notification"})).unwrap();

        assert_eq!(
            message,
            InboundMessage::Notification(Notification::default())
        );
    }

    #[test]
    fn untyped_values_are_rejected() {
        serde_json::from_value::<InboundMessage>(json!("hello")).unwrap_err();
        serde_json::from_value::<InboundMessage>(json!({"sender": 1})).unwrap_err();
    }
}
