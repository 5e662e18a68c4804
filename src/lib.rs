//! MCP server runtime for Arcade tool catalogs.
//!
//! This crate implements the Model Context Protocol server side: a JSON-RPC
//! dispatcher with per-session state, capability negotiation, notification
//! fan-out with rate limiting and debouncing, bidirectional request
//! correlation, and two transports (newline-delimited stdio and streamable
//! HTTP with SSE resumability).
//!
//! Tools are user code. The runtime consumes a pre-built [`ToolCatalog`] of
//! materialized tools and takes care of everything between the wire and the
//! tool function: argument validation, secret injection, runtime
//! authorization, structured result conversion, and log capture.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use arcade_mcp::catalog::{ToolCatalog, ToolkitBuilder};
//! use arcade_mcp::config::ServerSettings;
//! use arcade_mcp::server::McpServer;
//! use arcade_mcp::transport::stdio::StdioTransport;
//! use serde_json::json;
//!
//! # async fn run() -> arcade_mcp::Result<()> {
//! let mut catalog = ToolCatalog::new();
//! ToolkitBuilder::new("math")
//!     .tool("add", "Add two integers", json!({
//!         "type": "object",
//!         "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
//!         "required": ["a", "b"]
//!     }))
//!     .output_schema(json!({"type": "integer"}))
//!     .handler(|args, _ctx| async move {
//!         let a = args["a"].as_i64().unwrap_or(0);
//!         let b = args["b"].as_i64().unwrap_or(0);
//!         Ok(json!(a + b))
//!     })
//!     .register(&mut catalog)?;
//!
//! let server = McpServer::new(catalog, ServerSettings::from_env());
//! StdioTransport::new(server).run().await
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod server;
pub mod transport;
pub mod types;

pub use error::{Error, Result};

/// Protocol version this runtime speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions accepted from clients. Anything else negotiates down to
/// [`LATEST_PROTOCOL_VERSION`].
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Default server identity reported in `initialize` results.
pub const SERVER_NAME: &str = "Arcade MCP Server";
/// Default server version reported in `initialize` results.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
