//! End-to-end protocol scenarios driven through the dispatcher, the same
//! path both transports feed.

use std::sync::Arc;

use serde_json::{json, Value};

use arcade_mcp::catalog::{ToolCatalog, ToolkitBuilder};
use arcade_mcp::config::ServerSettings;
use arcade_mcp::server::McpServer;
use arcade_mcp::types::jsonrpc::RequestId;

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
async fn initialize_then_ping_then_list() {
    let server = math_server();
    let (session, _rx) = server.create_session("scenario-1");

    let init = server
        .handle_line(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"t","version":"1"}}}"#,
            Some(&session),
        )
        .await
        .expect("initialize returns a response");
    let init_value = serde_json::to_value(&init).unwrap();
    assert_eq!(init_value["id"], 1);
    assert_eq!(init_value["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(
        init_value["result"]["capabilities"]["tools"]["listChanged"],
        true
    );
    assert_eq!(
        init_value["result"]["serverInfo"]["name"],
        "Arcade MCP Server"
    );

    assert!(server
        .handle_line(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            Some(&session),
        )
        .await
        .is_none());

    let list = server
        .handle_line(
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            Some(&session),
        )
        .await
        .unwrap();
    let list_value = serde_json::to_value(&list).unwrap();
    let tools = list_value["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "math.add");
    assert_eq!(
        tools[0]["inputSchema"]["required"],
        json!(["a", "b"])
    );
}

#[tokio::test]
async fn ping_responds_identically_in_every_state() {
    let server = math_server();
    let (session, _rx) = server.create_session("ping-states");

    for id in [10i64, 11, 12] {
        let resp = server
            .handle_line(
                &format!(r#"{{"jsonrpc":"2.0","id":{id},"method":"ping"}}"#),
                Some(&session),
            )
            .await
            .unwrap();
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": id, "result": {}}));

        // Advance the state machine between pings.
        if id == 10 {
            server
                .handle_line(
                    r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
                    Some(&session),
                )
                .await
                .unwrap();
        } else if id == 11 {
            let none = server
                .handle_line(
                    r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                    Some(&session),
                )
                .await;
            assert!(none.is_none());
        }
    }
}

#[tokio::test]
async fn tool_call_with_structured_output_exact_shape() {
    let server = math_server();
    let (session, _rx) = server.create_session("scenario-2");
    session.mark_initialized();

    let resp = server
        .handle_line(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"math.add","arguments":{"a":2,"b":3}}}"#,
            Some(&session),
        )
        .await
        .unwrap();
    let value = serde_json::to_value(&resp).unwrap();
    assert_eq!(value["id"], 3);
    assert_eq!(value["result"]["structuredContent"], json!({"result": 5}));
    assert_eq!(value["result"]["isError"], false);
    let text = value["result"]["content"][0]["text"].as_str().unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(text).unwrap(),
        json!({"result": 5})
    );
}

#[tokio::test]
async fn unknown_tool_scenario() {
    let server = math_server();
    let (session, _rx) = server.create_session("scenario-3");
    session.mark_initialized();

    let resp = server
        .handle_line(
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"nope","arguments":{}}}"#,
            Some(&session),
        )
        .await
        .unwrap();
    let value = serde_json::to_value(&resp).unwrap();
    assert_eq!(value["id"], 4);
    assert_eq!(
        value["result"],
        json!({
            "content": [{"type": "text", "text": "Unknown tool: nope"}],
            "isError": true
        })
    );
}

#[tokio::test]
async fn underscore_spelling_resolves_same_tool() {
    let server = math_server();
    let (session, _rx) = server.create_session("spelling");
    session.mark_initialized();

    let resp = server
        .handle_line(
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"math_add","arguments":{"a":1,"b":1}}}"#,
            Some(&session),
        )
        .await
        .unwrap();
    let value = serde_json::to_value(&resp).unwrap();
    assert_eq!(value["result"]["structuredContent"], json!({"result": 2}));
}

#[tokio::test]
async fn session_queue_preserves_enqueue_order() {
    let server = math_server();
    let (session, mut rx) = server.create_session("ordering");
    session.mark_initialized();

    for i in 0..10 {
        assert!(session.send(json!({"seq": i})).await);
    }
    session.close().await;

    let mut seen = Vec::new();
    while let Some(Some(value)) = rx.recv().await {
        seen.push(value["seq"].as_i64().unwrap());
    }
    assert_eq!(seen, (0..10).collect::<Vec<i64>>());
}

#[test]
fn request_id_display() {
    assert_eq!(RequestId::Number(5).to_string(), "5");
    assert_eq!(RequestId::String("abc".into()).to_string(), "abc");
    assert_eq!(RequestId::Null.to_string(), "null");
}
