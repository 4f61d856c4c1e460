//! JSON-RPC 2.0 envelope with typed accessors.
//!
//! One envelope is one framed document on the wire: a request, a response
//! or a notification. Which one it is follows from the fields present, see
//! [`Envelope::kind`].
//!
//! # Example
//!
//! ```
//! use qrc_client::protocol::{Envelope, EnvelopeKind};
//! use serde_json::json;
//!
//! let params = json!({"Name": "gain1", "Value": -6.0});
//! let request = Envelope::request(7, "Control.Set", Some(params));
//! assert_eq!(request.kind(), EnvelopeKind::Request);
//! assert_eq!(request.id_u64(), Some(7));
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// The `error` member of a failure response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// What an envelope represents, derived from the members present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// `id` and `method`.
    Request,
    /// `method` without `id`; unsolicited push from the core.
    Notification,
    /// `result` or `error`, no `method`.
    Response,
    /// None of the above.
    Invalid,
}

/// A single JSON-RPC document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

// Keeps an explicit `null` as `Some(Value::Null)` so `"result": null` still
// reads as a response.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    fn empty() -> Self {
        Self {
            jsonrpc: default_version(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    /// Create a request carrying `id` and `method`.
    pub fn request(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            id: Some(Value::from(id)),
            method: Some(method.to_string()),
            params,
            ..Self::empty()
        }
    }

    /// Create a notification (no `id`).
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            method: Some(method.to_string()),
            params,
            ..Self::empty()
        }
    }

    /// Create a success response.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id: Some(Value::from(id)),
            result: Some(result),
            ..Self::empty()
        }
    }

    /// Create a failure response.
    pub fn failure(id: u64, code: i64, message: &str) -> Self {
        Self {
            id: Some(Value::from(id)),
            error: Some(RpcErrorObject {
                code,
                message: message.to_string(),
                data: None,
            }),
            ..Self::empty()
        }
    }

    /// Classify the envelope.
    pub fn kind(&self) -> EnvelopeKind {
        match (&self.method, &self.id) {
            (Some(_), Some(_)) => EnvelopeKind::Request,
            (Some(_), None) => EnvelopeKind::Notification,
            (None, _) if self.result.is_some() || self.error.is_some() => EnvelopeKind::Response,
            (None, _) => EnvelopeKind::Invalid,
        }
    }

    /// Numeric request id, if the `id` member is a non-negative integer.
    #[inline]
    pub fn id_u64(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// Method name, if present.
    #[inline]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.kind() == EnvelopeKind::Response
    }
}
