//! # Wire Envelope
//!
//! Every action travels as a structured JSON document:
//!
//! ```text
//! { "action": "<action id>", "data": { ...declared fields... } }
//! ```
//!
//! Decoding never trusts a document partially: either the whole payload parses
//! as JSON or the caller receives [`ProtocolError::MalformedMessage`].
//! Framing is left to the transport.

use crate::error::{constants, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded `{action, data}` pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(action: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            data: Value::Object(data),
        }
    }

    /// Extract the envelope from an already parsed document.
    ///
    /// A missing `data` member is treated as an empty field set.
    pub fn from_document(document: Value) -> Result<Self> {
        let Value::Object(mut obj) = document else {
            return Err(ProtocolError::MalformedMessage(
                constants::ERR_NOT_AN_OBJECT.to_string(),
            ));
        };
        let action = match obj.remove("action") {
            Some(Value::String(action)) => action,
            Some(other) => {
                return Err(ProtocolError::MalformedMessage(format!(
                    "action must be a string, got {other}"
                )))
            }
            None => {
                return Err(ProtocolError::MalformedMessage(
                    constants::ERR_MISSING_ACTION.to_string(),
                ))
            }
        };
        let data = obj.remove("data").unwrap_or(Value::Null);
        Ok(Self { action, data })
    }

    pub fn into_document(self) -> Value {
        serde_json::json!({
            "action": self.action,
            "data": self.data,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(ProtocolError::from)
    }
}

/// Parse raw bytes into a structured document.
pub fn decode_document(raw: &[u8]) -> Result<Value> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(ProtocolError::MalformedMessage(
            constants::ERR_EMPTY_DOCUMENT.to_string(),
        ));
    }
    serde_json::from_slice(raw).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
}

/// Serialize a document for the transport.
pub fn encode_document(document: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(document).map_err(ProtocolError::from)
}
