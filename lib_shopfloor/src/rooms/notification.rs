use serde_json::Value;

/// An event delivered to room subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Room named in the envelope, if the server included one.
    pub room: Option<String>,
    /// Event name (`order:event`, `package:event`, ...).
    pub event: String,
    /// Raw event body.
    pub payload: Value,
}

impl Notification {
    /// A notification without a room tag.
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            room: None,
            event: event.into(),
            payload,
        }
    }

    /// The `status` tag of the payload, if it is a string.
    pub fn status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_is_read_from_payload() {
        assert_eq!(Notification::new("order:event", json!({"status": "updated"})).status(), Some("updated"));
        assert_eq!(Notification::new("order:event", json!({"status": 3})).status(), None);
        assert_eq!(Notification::new("order:event", json!(["updated"])).status(), None);
    }
}
