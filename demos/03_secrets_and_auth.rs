//! Secrets and runtime authorization.
//!
//! One tool reads an injected secret; the other declares an OAuth
//! requirement served by the mock authorizer. With no token configured the
//! call returns the authorization URL for the client to drive; export
//! `ARCADE_GITHUB_TOKEN` (or add a mock token below) to complete the flow.
//!
//! Run with:
//! ```bash
//! SERVICE_API_KEY=dev-key cargo run --example 03_secrets_and_auth
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use arcade_mcp::catalog::{ToolCatalog, ToolkitBuilder};
use arcade_mcp::config::ServerSettings;
use arcade_mcp::server::auth::{MockAuthorizer, MockProvider};
use arcade_mcp::server::McpServer;
use arcade_mcp::transport::{HttpMode, HttpTransport};

#[tokio::main]
async fn main() -> arcade_mcp::Result<()> {
    tracing_subscriber::fmt().init();

    let mut catalog = ToolCatalog::new();
    ToolkitBuilder::new("svc")
        .tool(
            "status",
            "Report whether the service key is configured",
            json!({"type": "object"}),
        )
        .secret("SERVICE_API_KEY")
        .handler(|_args, ctx| async move {
            Ok(json!({
                "configured": ctx.get_secret("SERVICE_API_KEY").is_some(),
            }))
        })
        .tool(
            "list_repos",
            "List repositories for the authorized user",
            json!({"type": "object"}),
        )
        .requires_auth("github", "oauth2", vec!["repo".to_string()])
        .handler(|_args, ctx| async move {
            let token = ctx
                .authorization
                .as_ref()
                .and_then(|a| a.token.as_deref())
                .unwrap_or("<none>");
            // A real tool would call the GitHub API with this token.
            Ok(json!({"token_prefix": &token[..token.len().min(8)]}))
        })
        .register(&mut catalog)?;

    let mut tokens = HashMap::new();
    if let Ok(token) = std::env::var("ARCADE_GITHUB_TOKEN") {
        tokens.insert("local-dev".to_string(), token);
    }
    let authorizer = MockAuthorizer::new().with_provider(
        "github",
        MockProvider {
            scopes: vec!["repo".to_string()],
            mock_tokens: tokens,
        },
    );

    let mut settings = ServerSettings::from_env();
    settings.user_id.get_or_insert_with(|| "local-dev".to_string());

    let server = McpServer::with_authorizer(catalog, settings, Some(Arc::new(authorizer)));
    HttpTransport::new(server, HttpMode::Streamable)
        .serve("127.0.0.1:8000".parse().expect("valid address"))
        .await
}
