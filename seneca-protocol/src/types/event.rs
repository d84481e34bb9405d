use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::JsonRpcNotification;

use super::time::parse_timestamp;

/// Source id used for events replayed from conversation logs
pub const HISTORY_SOURCE: &str = "log";

/// An observed orchestrator event
///
/// Immutable once built; the bus hands out shared references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    source_instance_id: String,
    event_type: String,
    #[serde(with = "super::time")]
    timestamp: DateTime<Utc>,
    payload: Value,
}

impl Event {
    pub fn new(
        source_instance_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::with_timestamp(source_instance_id, event_type, Utc::now(), payload)
    }

    pub fn with_timestamp(
        source_instance_id: impl Into<String>,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: Value,
    ) -> Self {
        Self {
            source_instance_id: source_instance_id.into(),
            event_type: event_type.into(),
            timestamp,
            payload,
        }
    }

    /// Build an event from an unsolicited remote notification
    ///
    /// `params.event_type` (or `params.type`) names the event when present,
    /// otherwise the method does. `params.payload` is unwrapped if the remote
    /// nests it.
    pub fn from_notification(source: impl Into<String>, notification: JsonRpcNotification) -> Self {
        let params = notification.params;

        let event_type = params
            .get("event_type")
            .or_else(|| params.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                notification
                    .method
                    .strip_prefix("notifications/")
                    .unwrap_or(&notification.method)
                    .to_string()
            });

        let timestamp = params
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        let payload = match params.get("payload") {
            Some(inner) => inner.clone(),
            None => params,
        };

        Self::with_timestamp(source, event_type, timestamp, payload)
    }

    pub fn source_instance_id(&self) -> &str {
        &self.source_instance_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn is_historical(&self) -> bool {
        self.source_instance_id == HISTORY_SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_notification_typed() {
        let n = JsonRpcNotification::new(
            "notifications/event",
            json!({
                "event_type": "task_assigned",
                "timestamp": "2025-06-01T10:00:00Z",
                "payload": {"task_id": "t-1"}
            }),
        );
        let ev = Event::from_notification("marcus_1", n);
        assert_eq!(ev.source_instance_id(), "marcus_1");
        assert_eq!(ev.event_type(), "task_assigned");
        assert_eq!(ev.payload(), &json!({"task_id": "t-1"}));
        assert_eq!(ev.timestamp().to_rfc3339(), "2025-06-01T10:00:00+00:00");
    }

    #[test]
    fn test_from_notification_falls_back_to_method() {
        let n = JsonRpcNotification::new("notifications/progress", json!({"pct": 40}));
        let ev = Event::from_notification("marcus_1", n);
        assert_eq!(ev.event_type(), "progress");
        assert_eq!(ev.payload(), &json!({"pct": 40}));
    }

    #[test]
    fn test_from_notification_without_params() {
        let n = JsonRpcNotification::new("heartbeat", Value::Null);
        let ev = Event::from_notification("m", n);
        assert_eq!(ev.event_type(), "heartbeat");
        assert!(ev.payload().is_null());
    }

    #[test]
    fn test_historical_source() {
        let ev = Event::new(HISTORY_SOURCE, "conversation", json!({}));
        assert!(ev.is_historical());
        assert!(!Event::new("marcus_1", "x", json!({})).is_historical());
    }
}
