//! Minimal stdio server.
//!
//! Serves a one-tool toolkit over stdin/stdout, the transport VS Code and
//! other command-line MCP clients speak.
//!
//! Run with:
//! ```bash
//! cargo run --example 01_stdio_server
//! ```
//!
//! Then paste newline-delimited JSON-RPC, e.g.:
//! ```json
//! {"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"demo","version":"1"}}}
//! {"jsonrpc":"2.0","method":"notifications/initialized"}
//! {"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"greeter.greet","arguments":{"name":"world"}}}
//! ```

use serde_json::json;

use arcade_mcp::catalog::{ToolCatalog, ToolkitBuilder};
use arcade_mcp::config::ServerSettings;
use arcade_mcp::server::McpServer;
use arcade_mcp::transport::StdioTransport;

#[tokio::main]
async fn main() -> arcade_mcp::Result<()> {
    // Stdio servers must keep stdout clean for the protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let mut catalog = ToolCatalog::new();
    ToolkitBuilder::new("greeter")
        .tool(
            "greet",
            "Greet someone by name",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
        )
        .handler(|args, ctx| async move {
            let name = args["name"].as_str().unwrap_or("stranger").to_string();
            ctx.log().info(format!("greeting {name}"));
            Ok(json!(format!("Hello, {name}!")))
        })
        .register(&mut catalog)?;

    let server = McpServer::new(catalog, ServerSettings::from_env());
    StdioTransport::new(server).run().await
}
