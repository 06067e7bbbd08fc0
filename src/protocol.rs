//! Wire types for the analysis server protocol.
//!
//! Every message is a single JSON object on its own line. Outbound messages
//! are requests; inbound messages are either responses (carrying the `id` of
//! a request) or events (carrying an `event` name).
//!
//! ```text
//! -> {"id":"0","clientRequestTime":1476179373046,"method":"server.getVersion"}
//! <- {"id":"0","result":{"version":"1.6.0"}}
//! <- {"event":"server.connected","params":{"version":"1.6.0"}}
//! ```
//!
//! Consumer callbacks receive the structured values defined here
//! ([`Success`], [`Failure`], [`Event`]) rather than loose arguments.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

// =============================================================================
// Request Identifiers
// =============================================================================

/// Opaque identifier correlating a request with its response.
///
/// Generated from a strictly increasing counter and sent as its decimal
/// text. The remote side never interprets it as a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub(crate) fn from_counter(value: u64) -> Self {
        RequestId(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId(value.to_string())
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Request envelope written to the server's stdin.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRequest<'a> {
    pub id: &'a RequestId,
    /// Wall-clock send time in milliseconds since the epoch.
    pub client_request_time: i64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl<'a> OutboundRequest<'a> {
    /// Build an envelope stamped with the current time.
    pub fn new(id: &'a RequestId, method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            id,
            client_request_time: chrono::Utc::now().timestamp_millis(),
            method,
            params,
        }
    }

    /// Serialize as one line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Error payload of a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteError {
    /// Machine-readable error code, e.g. `INVALID_PARAMETER`.
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// How a response resolved its request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Map<String, Value>),
    Error(RemoteError),
}

/// A response line, already classified.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    pub id: String,
    pub outcome: Outcome,
}

/// One inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    Response(ResponseMessage),
    Event(Event),
}

impl ProtocolMessage {
    /// Parse and classify a single line.
    ///
    /// An object with an `id` field is a response, otherwise one with an
    /// `event` field is an event. Anything else is malformed.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| ProtocolError::malformed(line, format!("invalid JSON: {}", e)))?;

        let Value::Object(mut object) = value else {
            return Err(ProtocolError::malformed(line, "not a JSON object"));
        };

        if let Some(id) = object.remove("id") {
            let id = match id {
                Value::String(s) => s,
                other => {
                    return Err(ProtocolError::malformed(
                        line,
                        format!("id must be a string, got {}", other),
                    ))
                }
            };

            let outcome = if let Some(error) = object.remove("error") {
                let error: RemoteError = serde_json::from_value(error)
                    .map_err(|e| ProtocolError::malformed(line, format!("invalid error: {}", e)))?;
                Outcome::Error(error)
            } else {
                match object.remove("result") {
                    None | Some(Value::Null) => Outcome::Result(Map::new()),
                    Some(Value::Object(result)) => Outcome::Result(result),
                    Some(_) => {
                        return Err(ProtocolError::malformed(line, "result is not an object"))
                    }
                }
            };

            return Ok(ProtocolMessage::Response(ResponseMessage { id, outcome }));
        }

        if let Some(event) = object.remove("event") {
            let Value::String(event) = event else {
                return Err(ProtocolError::malformed(line, "event name is not a string"));
            };
            let params = object
                .remove("params")
                .unwrap_or_else(|| Value::Object(Map::new()));
            return Ok(ProtocolMessage::Event(Event { event, params }));
        }

        Err(ProtocolError::malformed(line, "neither id nor event field"))
    }
}

// =============================================================================
// Callback Values
// =============================================================================

/// Successful completion of a request, delivered to its callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Success {
    /// Method name the request was sent with.
    pub method: String,
    /// The `result` object; empty when the response had none.
    pub result: Map<String, Value>,
}

impl Success {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.result.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.result.get(field).and_then(Value::as_str)
    }

    /// Deserialize the whole result object into a typed struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.result.clone()))
    }
}

/// Remote rejection of a request, delivered to its errback.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub method: String,
    pub error: RemoteError,
}

/// A server-initiated notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name, e.g. `server.connected`.
    pub event: String,
    pub params: Value,
}

impl Event {
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.params.get(field).and_then(Value::as_str)
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.params.clone())
    }
}
