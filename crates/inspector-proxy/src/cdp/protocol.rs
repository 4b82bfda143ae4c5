//! CDP Protocol Types
//!
//! The relay never needs these to forward traffic - it forwards raw text.
//! They exist so handlers can look at `method` and `id` without string games.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Request ID as sent by the debugger or the device. Any JSON number goes;
/// negative and fractional ids are echoed back untouched.
pub type RequestId = Number;

/// CDP Request: `{id, method, params?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// CDP Response: `{id, result?, error?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CDPErrorObject>,
}

/// Error payload carried by a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CDPErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// CDP Event (notification without an id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Any message crossing a connection.
///
/// Classified by which keys are present: `id` and `method` is a request,
/// `id` alone is a response, `method` alone is an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CDPMessage {
    Request(CDPRequest),
    Response(CDPResponse),
    Event(CDPEvent),
}

impl<'de> Deserialize<'de> for CDPMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let (has_id, has_method) = match &value {
            Value::Object(map) => (map.contains_key("id"), map.contains_key("method")),
            _ => return Err(de::Error::custom("CDP message must be a JSON object")),
        };
        let message = match (has_id, has_method) {
            (true, true) => serde_json::from_value(value).map(CDPMessage::Request),
            (true, false) => serde_json::from_value(value).map(CDPMessage::Response),
            (false, true) => serde_json::from_value(value).map(CDPMessage::Event),
            (false, false) => {
                return Err(de::Error::custom("CDP message has neither id nor method"))
            }
        };
        message.map_err(de::Error::custom)
    }
}

impl CDPMessage {
    /// Parse raw frame text. Fails on invalid JSON and on objects that are
    /// none of request/response/event.
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn id(&self) -> Option<RequestId> {
        match self {
            CDPMessage::Request(req) => Some(req.id.clone()),
            CDPMessage::Response(resp) => Some(resp.id.clone()),
            CDPMessage::Event(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            CDPMessage::Request(req) => Some(&req.method),
            CDPMessage::Event(event) => Some(&event.method),
            CDPMessage::Response(_) => None,
        }
    }

    /// Empty successful response for `id`
    pub fn empty_result(id: impl Into<RequestId>) -> Self {
        CDPMessage::Response(CDPResponse {
            id: id.into(),
            result: Some(Value::Object(Default::default())),
            error: None,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
