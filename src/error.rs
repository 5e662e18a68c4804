//! Error types for the MCP runtime.
//!
//! One taxonomy covers the whole crate; each variant knows the JSON-RPC
//! error code it maps to when it escapes to the wire.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// JSON-RPC error codes defined by the protocol.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// MCP: the requested resource does not exist.
    pub const RESOURCE_NOT_FOUND: i64 = -32002;
}

/// Runtime error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested entity (tool, prompt, handler, session) does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Entity registered twice under the same key.
    #[error("{0}")]
    Duplicate(String),

    /// Parameters or return values failed validation.
    #[error("{0}")]
    Validation(String),

    /// Tool execution failure.
    #[error("{0}")]
    Tool(String),

    /// Resource read or registration failure.
    #[error("{0}")]
    Resource(String),

    /// Prompt rendering failure.
    #[error("{0}")]
    Prompt(String),

    /// Runtime authorization failure.
    #[error("{0}")]
    Authorization(String),

    /// Session lifecycle violation.
    #[error("{0}")]
    Session(String),

    /// Malformed or out-of-contract protocol message.
    #[error("{0}")]
    Protocol(String),

    /// Startup or settings problem.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An awaited operation timed out.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The addressed capability is disabled.
    #[error("{0}")]
    Disabled(String),

    /// Transport-level failure (stream closed, framing, I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// JSON-RPC error code for this error when surfaced on the wire.
    ///
    /// NotFound maps to method-not-found, validation to invalid-params,
    /// resource lookups to the MCP resource code; the rest are internal.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            Self::NotFound(_) => codes::METHOD_NOT_FOUND,
            Self::Validation(_) => codes::INVALID_PARAMS,
            Self::Resource(msg) if msg.contains("not found") => codes::RESOURCE_NOT_FOUND,
            Self::Protocol(_) => codes::INVALID_REQUEST,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// Whether this error's message is safe to surface verbatim even when
    /// error masking is enabled. Domain errors are; internal ones are not.
    pub fn is_domain_error(&self) -> bool {
        !matches!(self, Self::Internal(_) | Self::Transport(_))
    }

    /// Convenience constructor for internal errors.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Convenience constructor for validation errors.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Convenience constructor for protocol errors.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Convenience constructor for not-found errors.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(format!("invalid JSON: {e}"))
    }
}
