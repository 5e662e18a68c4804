//! Full-stack HTTP test: real TCP listener, real client, streamable mode.

use std::sync::Arc;

use serde_json::json;

use arcade_mcp::catalog::{ToolCatalog, ToolkitBuilder};
use arcade_mcp::config::ServerSettings;
use arcade_mcp::server::McpServer;
use arcade_mcp::transport::{HttpMode, HttpTransport};

fn math_server() -> Arc<McpServer> {
    let mut catalog = ToolCatalog::new();
    ToolkitBuilder::new("math")
        .tool(
            "add",
            "Add two integers",
            json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            }),
        )
        .output_schema(json!({"type": "integer"}))
        .handler(|args, _ctx| async move {
            Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)))
        })
        .register(&mut catalog)
        .unwrap();
    let mut settings = ServerSettings::default();
    settings.enable_logging_middleware = false;
    McpServer::new(catalog, settings)
}

#[tokio::test]
async fn streamable_http_session_lifecycle() {
    let transport = HttpTransport::new(math_server(), HttpMode::Streamable);
    let (addr, task) = transport
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let base = format!("http://{addr}/mcp");
    let client = reqwest::Client::new();

    // Initialize: envelope back, session id in the header.
    let response = client
        .post(&base)
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": {"name": "e2e", "version": "1"}
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["result"]["protocolVersion"], "2025-06-18");

    // Initialized notification: accepted, no body expected.
    let response = client
        .post(&base)
        .header("mcp-session-id", &session_id)
        .json(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    // Tool call with the negotiated protocol version header.
    let response = client
        .post(&base)
        .header("mcp-session-id", &session_id)
        .header("mcp-protocol-version", "2025-06-18")
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "math.add", "arguments": {"a": 20, "b": 22}}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["result"]["structuredContent"], json!({"result": 42}));
    assert_eq!(body["result"]["isError"], false);

    // A session the server never issued is rejected.
    let response = client
        .post(&base)
        .header("mcp-session-id", "bogus")
        .json(&json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    task.abort();
}
