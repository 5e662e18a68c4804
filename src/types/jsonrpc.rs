//! JSON-RPC 2.0 envelopes.
//!
//! The runtime recognizes message variants by field presence: a request has
//! `method` and `id`, a notification has `method` and no `id`, a response has
//! `id` and either `result` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{codes, Error, Result};

/// The only JSON-RPC version this runtime speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier. String or number per JSON-RPC; `Null` is used when
/// replying to a message whose id could not be recovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id
    Number(i64),
    /// String id
    String(String),
    /// Absent/unrecoverable id (serializes as JSON null)
    Null,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (see [`crate::error::codes`])
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Either a result or an error; exactly one is present on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Successful result
    Result {
        /// The result value
        result: Value,
    },
    /// Error outcome
    Error {
        /// The error object
        error: JsonRpcError,
    },
}

/// A complete JSON-RPC response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Id of the request being answered
    pub id: RequestId,
    /// Result or error
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    /// Build a success response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Result { result },
        }
    }

    /// Build an error response.
    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Error {
                error: JsonRpcError {
                    code,
                    message: message.into(),
                    data: None,
                },
            },
        }
    }

    /// The result value, if this is a success response.
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            ResponsePayload::Result { result } => Some(result),
            ResponsePayload::Error { .. } => None,
        }
    }

    /// The error object, if this is an error response.
    pub fn error_object(&self) -> Option<&JsonRpcError> {
        match &self.payload {
            ResponsePayload::Result { .. } => None,
            ResponsePayload::Error { error } => Some(error),
        }
    }

    /// Serialize to a single line of JSON (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // A response we built ourselves always serializes; this arm only
            // protects against pathological float values in tool output.
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"serialization failure"}}}}"#,
                codes::INTERNAL_ERROR
            )
        })
    }
}

/// An incoming message, classified by field presence.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Request expecting a response
    Request {
        /// Request id
        id: RequestId,
        /// Method name
        method: String,
        /// Raw params, parsed per-method later
        params: Option<Value>,
    },
    /// One-way notification
    Notification {
        /// Method name
        method: String,
        /// Raw params
        params: Option<Value>,
    },
    /// Response to a server-initiated request
    Response {
        /// Id of the server request being answered
        id: RequestId,
        /// Result value, if success
        result: Option<Value>,
        /// Error object, if failure
        error: Option<JsonRpcError>,
    },
}

impl ClientMessage {
    /// Classify a parsed JSON value into a message variant.
    ///
    /// Non-object values are a protocol error. Messages with neither a
    /// `method` nor a `result`/`error` are rejected the same way.
    pub fn classify(value: Value) -> Result<Self> {
        let obj = match value {
            Value::Object(map) => map,
            other => {
                return Err(Error::protocol(format!(
                    "message must be a JSON object, got {}",
                    type_name(&other)
                )))
            },
        };

        let id = obj
            .get("id")
            .cloned()
            .map(serde_json::from_value::<RequestId>)
            .transpose()
            .map_err(|_| Error::protocol("request id must be a string or number"))?;

        if let Some(method) = obj.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            let params = obj.get("params").cloned();
            return Ok(match id {
                Some(id) if id != RequestId::Null => Self::Request { id, method, params },
                _ => Self::Notification { method, params },
            });
        }

        if obj.contains_key("result") || obj.contains_key("error") {
            let error = obj
                .get("error")
                .cloned()
                .map(serde_json::from_value::<JsonRpcError>)
                .transpose()
                .map_err(|_| Error::protocol("malformed error object in response"))?;
            return Ok(Self::Response {
                id: id.unwrap_or(RequestId::Null),
                result: obj.get("result").cloned(),
                error,
            });
        }

        Err(Error::protocol(
            "message has neither a method nor a result/error",
        ))
    }

    /// Parse a raw wire line into a classified message.
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        Self::classify(value)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
