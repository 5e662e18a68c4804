//! SSE server with progress and log notifications.
//!
//! A slow tool reports progress while it works. With the SSE transport the
//! client sees `notifications/progress` and `notifications/message` events
//! on its `GET /mcp` stream, correlated by the `progressToken` it supplied
//! in the call's `_meta`.
//!
//! Run with:
//! ```bash
//! cargo run --example 02_sse_notifications
//! ```
//!
//! Then:
//! ```bash
//! curl -N -H 'Accept: text/event-stream' \
//!     -H "mcp-session-id: $SESSION" http://127.0.0.1:8000/mcp
//! ```

use std::time::Duration;

use serde_json::json;

use arcade_mcp::catalog::{ToolCatalog, ToolkitBuilder};
use arcade_mcp::config::ServerSettings;
use arcade_mcp::server::McpServer;
use arcade_mcp::transport::{HttpMode, HttpTransport};

#[tokio::main]
async fn main() -> arcade_mcp::Result<()> {
    tracing_subscriber::fmt().init();

    let mut catalog = ToolCatalog::new();
    ToolkitBuilder::new("jobs")
        .tool(
            "crunch",
            "Crunch numbers in steps, reporting progress",
            json!({
                "type": "object",
                "properties": {"steps": {"type": "integer"}},
            }),
        )
        .handler(|args, ctx| async move {
            let steps = args["steps"].as_u64().unwrap_or(5);
            ctx.log().info(format!("starting a {steps}-step crunch"));
            for step in 1..=steps {
                tokio::time::sleep(Duration::from_millis(500)).await;
                ctx.progress().report(
                    step as f64,
                    Some(steps as f64),
                    Some(format!("step {step} of {steps}")),
                );
            }
            ctx.log().info("crunch finished");
            Ok(json!({"steps_completed": steps}))
        })
        .register(&mut catalog)?;

    let server = McpServer::new(catalog, ServerSettings::from_env());
    HttpTransport::new(server, HttpMode::Sse)
        .serve("127.0.0.1:8000".parse().expect("valid address"))
        .await
}
