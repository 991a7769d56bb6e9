use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing command envelope (client to browser).
///
/// The `id` and `session_id` fields are the envelope the multiplexer
/// adds around a [`Command`](crate::Command)'s method and params.
#[derive(Debug, Serialize)]
pub(crate) struct CommandEnvelope {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Raw incoming frame before classification.
///
/// Every inbound text frame is deserialized into this union of response
/// and event fields, then split by [`classify`](Self::classify). The
/// `session_id` is read by the demultiplexer before classification.
#[derive(Debug, Deserialize)]
pub(crate) struct RawMessage {
    pub id: Option<u64>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<WireError>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Error payload inside a response frame.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A response to a previously sent command (frame carried an `id`).
#[derive(Debug)]
pub(crate) struct Response {
    pub id: u64,
    pub result: Result<Value, WireError>,
}

/// An unsolicited event (frame carried a `method` but no `id`).
#[derive(Debug)]
pub(crate) struct EventFrame {
    pub method: String,
    pub params: Value,
}

/// Classification of a raw frame.
#[derive(Debug)]
pub(crate) enum MessageKind {
    Response(Response),
    Event(EventFrame),
}

impl RawMessage {
    /// Split this frame into a response or an event.
    ///
    /// Frames with an `id` are responses; frames with a `method` but no
    /// `id` are events. Returns `None` for frames that are neither.
    pub fn classify(self) -> Option<MessageKind> {
        if let Some(id) = self.id {
            let result = match self.error {
                Some(error) => Err(error),
                None => Ok(self.result.unwrap_or(Value::Null)),
            };
            Some(MessageKind::Response(Response { id, result }))
        } else if let Some(method) = self.method {
            Some(MessageKind::Event(EventFrame {
                method,
                params: self.params.unwrap_or(Value::Null),
            }))
        } else {
            None
        }
    }
}
