//! ---
//! gw_section: "02-messaging-ipc-data-model"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Frames, normalized records and connection states shared across crates."
//! gw_version: "v0.0.0-prealpha"
//! gw_owner: "tbd"
//! ---
use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Slash-delimited broker channel identifier.
pub type Topic = String;

/// Payload exactly as received from the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Topic the frame was published on.
    pub topic: Topic,
    /// Undecoded payload; may hold several newline separated records.
    pub payload: Bytes,
    /// Time the link handed the frame over.
    pub received_at: DateTime<Utc>,
}

impl RawFrame {
    /// Build a frame stamped with the current time.
    pub fn new(topic: impl Into<Topic>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Parsed value of a single record line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordValue {
    /// Scalar reading, e.g. an rpm sample.
    Number(f64),
    /// Named numeric fields in declaration order.
    Fields(IndexMap<String, f64>),
    /// Verbatim text line.
    Text(String),
}

impl RecordValue {
    /// Scalar view of the value when it is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RecordValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Field lookup for structured values.
    pub fn field(&self, name: &str) -> Option<f64> {
        match self {
            RecordValue::Fields(fields) => fields.get(name).copied(),
            _ => None,
        }
    }
}

/// A single parsed line bound to its topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Source topic.
    pub topic: Topic,
    /// Parsed value.
    pub value: RecordValue,
    /// Processing time of the line.
    pub observed_at: DateTime<Utc>,
}

impl NormalizedRecord {
    /// Construct a record observed now.
    pub fn now(topic: impl Into<Topic>, value: RecordValue) -> Self {
        Self {
            topic: topic.into(),
            value,
            observed_at: Utc::now(),
        }
    }
}

/// Lifecycle of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link; initial and terminal state.
    #[default]
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Link established and subscriptions issued.
    Connected,
    /// Link lost; retrying on a fixed interval.
    Reconnecting,
    /// Broker refused the session; retries stopped.
    Error,
}

impl ConnectionState {
    /// Every state, in gauge order.
    pub const ALL: [ConnectionState; 5] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Reconnecting,
        ConnectionState::Error,
    ];

    /// Stable lowercase label used in logs, metrics and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item on the ordered stream from the connection task to the ingestion task.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection entered a new state.
    State(ConnectionState),
    /// A frame arrived on a subscribed topic.
    Frame(RawFrame),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_values_serialize_untagged() {
        let number = serde_json::to_value(RecordValue::Number(12.5)).unwrap();
        assert_eq!(number, serde_json::json!(12.5));

        let mut fields = IndexMap::new();
        fields.insert("R".to_owned(), 10.0);
        fields.insert("Y".to_owned(), 20.0);
        let structured = serde_json::to_string(&RecordValue::Fields(fields)).unwrap();
        assert_eq!(structured, r#"{"R":10.0,"Y":20.0}"#);

        let text = serde_json::to_value(RecordValue::Text("Activated".into())).unwrap();
        assert_eq!(text, serde_json::json!("Activated"));
    }

    #[test]
    fn frame_text_is_lossy() {
        let frame = RawFrame::new("a/b", vec![b'1', 0xff, b'2']);
        assert_eq!(frame.text(), "1\u{fffd}2");
    }

    #[test]
    fn connection_state_labels() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        let json = serde_json::to_string(&ConnectionState::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
