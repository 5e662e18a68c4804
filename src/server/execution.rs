//! Tool execution pipeline.
//!
//! `tools/call` flows through here: resolve the tool, assemble a fresh
//! [`ToolContext`] (identity, metadata, secrets, progress token, log
//! capture, client-request capability), gate on authorization, validate
//! arguments, run the handler, and convert the return value into a
//! [`CallToolResult`]. Tool failures never abort the session; they become
//! `isError:true` results.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::catalog::MaterializedTool;
use crate::config::ServerSettings;
use crate::error::Result;
use crate::server::auth::{AuthorizationContext, AuthorizationStatus, Authorizer};
use crate::server::notifications::NotificationManager;
use crate::server::requests::RequestManager;
use crate::server::session::Session;
use crate::types::protocol::{CallToolParams, CallToolResult, Content, LoggingLevel, ProgressToken};

const AUTH_NOT_CONFIGURED_HINT: &str = "Authorization required but no authorizer is configured. \
     Set ARCADE_API_KEY (and optionally ARCADE_API_URL) to enable auth-required tools.";

/// One captured log line from a tool invocation.
#[derive(Debug, Clone)]
pub struct CapturedLog {
    /// Severity
    pub level: LoggingLevel,
    /// Message text
    pub message: String,
}

type LogSink = Arc<Mutex<Vec<CapturedLog>>>;

#[derive(Clone)]
struct NotificationBinding {
    notifications: Arc<NotificationManager>,
    client_id: String,
}

/// Logging capability bound to a tool invocation.
///
/// Every line is captured for embedding into the result's `_meta.logs`.
/// Lines at or above the client's minimum level are also forwarded as
/// `notifications/message`; forwarding is fire-and-forget and failures are
/// swallowed.
#[derive(Clone)]
pub struct ToolLogger {
    tool_name: String,
    min_level: LoggingLevel,
    sink: LogSink,
    binding: Option<NotificationBinding>,
}

impl ToolLogger {
    /// Log at an explicit level.
    pub fn log(&self, level: LoggingLevel, message: impl Into<String>) {
        let message = message.into();
        self.sink.lock().push(CapturedLog {
            level,
            message: message.clone(),
        });
        if level < self.min_level {
            return;
        }
        if let Some(binding) = &self.binding {
            let binding = binding.clone();
            let logger = self.tool_name.clone();
            tokio::spawn(async move {
                binding
                    .notifications
                    .notify_message(
                        level,
                        Value::String(message),
                        Some(logger),
                        Some(vec![binding.client_id]),
                    )
                    .await;
            });
        }
    }

    /// Debug-level log.
    pub fn debug(&self, message: impl Into<String>) {
        self.log(LoggingLevel::Debug, message);
    }

    /// Info-level log.
    pub fn info(&self, message: impl Into<String>) {
        self.log(LoggingLevel::Info, message);
    }

    /// Warning-level log.
    pub fn warning(&self, message: impl Into<String>) {
        self.log(LoggingLevel::Warning, message);
    }

    /// Error-level log.
    pub fn error(&self, message: impl Into<String>) {
        self.log(LoggingLevel::Error, message);
    }
}

/// Progress capability bound to a tool invocation.
///
/// A no-op unless the client supplied a progress token. Reports are
/// fire-and-forget.
#[derive(Clone)]
pub struct ProgressReporter {
    token: Option<ProgressToken>,
    binding: Option<NotificationBinding>,
}

impl ProgressReporter {
    /// Emit a progress notification correlated with the call's token.
    pub fn report(&self, progress: f64, total: Option<f64>, message: Option<String>) {
        let (Some(token), Some(binding)) = (self.token.clone(), self.binding.clone()) else {
            return;
        };
        tokio::spawn(async move {
            binding
                .notifications
                .notify_progress(
                    token,
                    progress,
                    total,
                    message,
                    Some(vec![binding.client_id]),
                    None,
                    Some(0),
                )
                .await;
        });
    }

    /// The client-supplied token, if any.
    pub fn token(&self) -> Option<&ProgressToken> {
        self.token.as_ref()
    }
}

/// Capability for issuing server-to-client requests from inside a tool.
#[derive(Clone)]
pub struct ClientRequests {
    manager: RequestManager,
}

impl ClientRequests {
    /// Send a request to the connected client and await its response.
    /// Blocks the tool; times out per server settings.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.manager.send_request(method, params, None).await
    }
}

/// Metadata entry surfaced to tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataItem {
    /// Key (e.g. "user_email")
    pub key: String,
    /// Value
    pub value: String,
}

/// Per-invocation context handed to the tool.
///
/// Owned by a single invocation and never shared across calls.
#[derive(Clone)]
pub struct ToolContext {
    /// Resolved user identity
    pub user_id: Option<String>,
    /// Merged environment and local metadata
    pub metadata: Vec<MetadataItem>,
    /// Progress token from the request's `_meta`
    pub progress_token: Option<ProgressToken>,
    /// Token context from a completed authorization
    pub authorization: Option<AuthorizationContext>,
    secrets: HashMap<String, String>,
    logger: ToolLogger,
    progress: ProgressReporter,
    client: Option<ClientRequests>,
}

impl ToolContext {
    /// Look up an injected secret.
    pub fn get_secret(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(String::as_str)
    }

    /// The invocation's logger.
    pub fn log(&self) -> &ToolLogger {
        &self.logger
    }

    /// The invocation's progress reporter.
    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Server-to-client request capability, present when a live session backs
    /// this invocation.
    pub fn client(&self) -> Option<&ClientRequests> {
        self.client.as_ref()
    }
}

/// Executes tools against the runtime's settings, notifications, and
/// authorizer.
pub struct ToolExecutor {
    settings: Arc<ServerSettings>,
    notifications: Arc<NotificationManager>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("auth_disabled", &self.settings.auth_disabled)
            .field("has_authorizer", &self.authorizer.is_some())
            .finish()
    }
}

impl ToolExecutor {
    /// Build an executor.
    pub fn new(
        settings: Arc<ServerSettings>,
        notifications: Arc<NotificationManager>,
        authorizer: Option<Arc<dyn Authorizer>>,
    ) -> Self {
        Self {
            settings,
            notifications,
            authorizer,
        }
    }

    /// Run the full `tools/call` pipeline.
    ///
    /// `tool` is `None` when catalog resolution failed; that case yields the
    /// result form (not a JSON-RPC error), since clients render tool errors
    /// differently from transport errors.
    pub async fn call_tool(
        &self,
        tool: Option<MaterializedTool>,
        params: &CallToolParams,
        session: Option<&Arc<Session>>,
        min_log_level: LoggingLevel,
    ) -> CallToolResult {
        let Some(tool) = tool else {
            return CallToolResult::error(format!("Unknown tool: {}", params.name));
        };

        let sink: LogSink = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = self.build_context(&tool, params, session, min_log_level, sink.clone());

        if let Some(requirement) = &tool.definition.requirements.authorization {
            if !self.settings.auth_disabled {
                let user_id = ctx.user_id.clone().unwrap_or_else(|| "anonymous".into());
                let Some(authorizer) = &self.authorizer else {
                    return CallToolResult::error(AUTH_NOT_CONFIGURED_HINT);
                };
                match authorizer.authorize(requirement, &user_id).await {
                    Err(err) => {
                        tracing::error!(
                            target: "mcp.execution",
                            tool = %params.name,
                            error = %err,
                            "authorization check failed"
                        );
                        return CallToolResult::error(AUTH_NOT_CONFIGURED_HINT);
                    },
                    Ok(response) if response.status != AuthorizationStatus::Completed => {
                        // The client renders the URL and drives the user
                        // through the flow; this is not an error.
                        let url = response
                            .url
                            .unwrap_or_else(|| "Authorization pending".to_string());
                        return CallToolResult::text(url);
                    },
                    Ok(response) => {
                        ctx.authorization = response.context.or_else(|| {
                            Some(AuthorizationContext {
                                user_id: Some(user_id.clone()),
                                ..Default::default()
                            })
                        });
                    },
                }
            }
        }

        let args = match &params.arguments {
            Value::Null => json!({}),
            other => other.clone(),
        };
        if let Err(err) = tool.validate_args(&args) {
            return finish_error(err.to_string(), &sink);
        }

        let value = match tool.handler.call(args, ctx).await {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(
                    target: "mcp.execution",
                    tool = %params.name,
                    error = %err,
                    "tool returned error"
                );
                return finish_error(err.to_string(), &sink);
            },
        };

        convert_result(&tool, value, &sink)
    }

    fn build_context(
        &self,
        tool: &MaterializedTool,
        params: &CallToolParams,
        session: Option<&Arc<Session>>,
        min_log_level: LoggingLevel,
        sink: LogSink,
    ) -> ToolContext {
        let user_id = session
            .map(|s| s.user_id.clone())
            .filter(|id| !id.is_empty())
            .or_else(|| std::env::var(crate::config::ENV_USER_ID).ok().filter(|v| !v.is_empty()))
            .or_else(|| self.settings.user_id.clone());

        // Environment identity first, then local metadata; existing keys are
        // never overwritten.
        let mut metadata: Vec<MetadataItem> = Vec::new();
        let email = std::env::var(crate::config::ENV_USER_EMAIL)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.settings.user_email.clone());
        if let Some(email) = email {
            metadata.push(MetadataItem {
                key: "user_email".into(),
                value: email,
            });
        }
        for (key, value) in &self.settings.local_metadata {
            if !metadata.iter().any(|m| &m.key == key) {
                metadata.push(MetadataItem {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }

        // Missing secrets are not a hard error; the tool may degrade.
        let mut secrets = HashMap::new();
        for secret in &tool.definition.requirements.secrets {
            match self.settings.lookup_secret(&secret.key) {
                Some(value) => {
                    secrets.insert(secret.key.clone(), value);
                },
                None => tracing::debug!(
                    target: "mcp.execution",
                    tool = %tool.definition.fully_qualified_name(),
                    key = %secret.key,
                    "declared secret not available"
                ),
            }
        }

        let binding = session.map(|s| NotificationBinding {
            notifications: self.notifications.clone(),
            client_id: s.session_id.clone(),
        });
        let progress_token = params.meta.as_ref().and_then(|m| m.progress_token.clone());

        ToolContext {
            user_id,
            metadata,
            progress_token: progress_token.clone(),
            authorization: None,
            secrets,
            logger: ToolLogger {
                tool_name: tool.definition.fully_qualified_name(),
                min_level: min_log_level,
                sink,
                binding: binding.clone(),
            },
            progress: ProgressReporter {
                token: progress_token,
                binding,
            },
            client: session.map(|s| ClientRequests {
                manager: s.request_manager.clone(),
            }),
        }
    }
}

fn captured_logs(sink: &LogSink) -> Option<Value> {
    let logs = sink.lock();
    if logs.is_empty() {
        return None;
    }
    Some(Value::Array(
        logs.iter()
            .map(|log| json!({"level": log.level.to_string(), "message": log.message}))
            .collect(),
    ))
}

fn finish_error(message: String, sink: &LogSink) -> CallToolResult {
    let mut result = CallToolResult::error(message);
    if let Some(logs) = captured_logs(sink) {
        result.meta = Some(json!({"logs": logs}));
    }
    result
}

/// Convert a tool's return value per the result contract.
///
/// Objects (and any value from a tool with a declared output schema) become
/// `structuredContent`, with non-objects wrapped as `{"result": value}`;
/// `content[0]` mirrors the structured value as JSON text. Unstructured
/// values convert by type: primitives to a text block, collections to JSON
/// text, null to no content. Captured logs land in `_meta.logs` and are
/// mirrored into `structuredContent.logs` for clients that ignore `_meta`.
fn convert_result(tool: &MaterializedTool, value: Value, sink: &LogSink) -> CallToolResult {
    let logs = captured_logs(sink);
    let has_output_schema = tool.definition.output_schema.is_some();

    let mut structured: Option<Map<String, Value>> = match &value {
        Value::Object(map) => Some(map.clone()),
        _ if has_output_schema => {
            let mut map = Map::new();
            map.insert("result".to_string(), value.clone());
            Some(map)
        },
        _ => None,
    };

    if let Some(logs) = &logs {
        let map = structured.get_or_insert_with(|| {
            let mut map = Map::new();
            map.insert("result".to_string(), value.clone());
            map
        });
        map.insert("logs".to_string(), logs.clone());
    }

    let content = match &structured {
        Some(map) => {
            let text = serde_json::to_string(&Value::Object(map.clone()))
                .unwrap_or_else(|_| "{}".to_string());
            vec![Content::Text { text }]
        },
        None => unstructured_content(&value),
    };

    CallToolResult {
        content,
        structured_content: structured.map(Value::Object),
        is_error: false,
        meta: logs.map(|l| json!({"logs": l})),
    }
}

fn unstructured_content(value: &Value) -> Vec<Content> {
    match value {
        Value::Null => vec![],
        Value::String(s) => vec![Content::Text { text: s.clone() }],
        Value::Bool(b) => vec![Content::Text {
            text: b.to_string(),
        }],
        Value::Number(n) => vec![Content::Text {
            text: n.to_string(),
        }],
        other => vec![Content::Text {
            text: serde_json::to_string(other).unwrap_or_default(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ToolCatalog, ToolkitBuilder};
    use crate::error::Error;
    use crate::server::auth::{MockAuthorizer, MockProvider};
    use crate::server::notifications::NotificationSender;
    use crate::types::protocol::RequestMeta;
    use async_trait::async_trait;

    struct NullSender;

    #[async_trait]
    impl NotificationSender for NullSender {
        async fn send_notification(&self, _client_id: &str, _payload: Value) -> bool {
            true
        }
    }

    fn executor_with(
        settings: ServerSettings,
        authorizer: Option<Arc<dyn Authorizer>>,
    ) -> ToolExecutor {
        let notifications = Arc::new(NotificationManager::new(Arc::new(NullSender), 60, 100));
        ToolExecutor::new(Arc::new(settings), notifications, authorizer)
    }

    fn math_catalog() -> ToolCatalog {
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
        catalog
    }

    fn call_params(name: &str, arguments: Value) -> CallToolParams {
        CallToolParams {
            name: name.into(),
            arguments,
            meta: None,
        }
    }

    #[tokio::test]
    async fn structured_output_with_declared_schema() {
        let executor = executor_with(ServerSettings::default(), None);
        let catalog = math_catalog();
        let tool = catalog.get("math.add").unwrap().clone();

        let result = executor
            .call_tool(
                Some(tool),
                &call_params("math.add", json!({"a": 2, "b": 3})),
                None,
                LoggingLevel::Info,
            )
            .await;

        assert!(!result.is_error);
        assert_eq!(result.structured_content, Some(json!({"result": 5})));
        match &result.content[0] {
            Content::Text { text } => {
                assert_eq!(
                    serde_json::from_str::<Value>(text).unwrap(),
                    json!({"result": 5})
                );
            },
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_result() {
        let executor = executor_with(ServerSettings::default(), None);
        let result = executor
            .call_tool(
                None,
                &call_params("nope", json!({})),
                None,
                LoggingLevel::Info,
            )
            .await;
        assert!(result.is_error);
        assert_eq!(
            result.content,
            vec![Content::Text {
                text: "Unknown tool: nope".into()
            }]
        );
    }

    #[tokio::test]
    async fn invalid_arguments_become_error_result() {
        let executor = executor_with(ServerSettings::default(), None);
        let catalog = math_catalog();
        let tool = catalog.get("math.add").unwrap().clone();

        let result = executor
            .call_tool(
                Some(tool),
                &call_params("math.add", json!({"a": 2})),
                None,
                LoggingLevel::Info,
            )
            .await;
        assert!(result.is_error);
        assert!(!result.content.is_empty());
    }

    #[tokio::test]
    async fn handler_error_becomes_error_result() {
        let mut catalog = ToolCatalog::new();
        ToolkitBuilder::new("flaky")
            .tool("boom", "Always fails", json!({"type": "object"}))
            .handler(|_args, _ctx| async move {
                Err::<Value, _>(Error::Tool("upstream rate limited".into()))
            })
            .register(&mut catalog)
            .unwrap();
        let executor = executor_with(ServerSettings::default(), None);
        let tool = catalog.get("flaky.boom").unwrap().clone();

        let result = executor
            .call_tool(
                Some(tool),
                &call_params("flaky.boom", json!({})),
                None,
                LoggingLevel::Info,
            )
            .await;
        assert!(result.is_error);
        match &result.content[0] {
            Content::Text { text } => assert!(text.contains("rate limited")),
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[tokio::test]
    async fn secrets_injected_and_missing_secret_degrades() {
        let mut catalog = ToolCatalog::new();
        ToolkitBuilder::new("svc")
            .tool("whoami", "Reports its secret", json!({"type": "object"}))
            .secret("SVC_TOKEN")
            .secret("SVC_MISSING")
            .handler(|_args, ctx| async move {
                Ok(json!({
                    "token": ctx.get_secret("SVC_TOKEN"),
                    "missing": ctx.get_secret("SVC_MISSING"),
                }))
            })
            .register(&mut catalog)
            .unwrap();

        let mut settings = ServerSettings::default();
        settings
            .secrets
            .insert("SVC_TOKEN".to_string(), "s3cr3t".to_string());
        let executor = executor_with(settings, None);
        let tool = catalog.get("svc.whoami").unwrap().clone();

        let result = executor
            .call_tool(
                Some(tool),
                &call_params("svc.whoami", json!({})),
                None,
                LoggingLevel::Info,
            )
            .await;
        assert!(!result.is_error);
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["token"], "s3cr3t");
        assert_eq!(structured["missing"], Value::Null);
    }

    #[tokio::test]
    async fn captured_logs_embedded_in_meta_and_structured() {
        let mut catalog = ToolCatalog::new();
        ToolkitBuilder::new("chatty")
            .tool("run", "Logs while working", json!({"type": "object"}))
            .handler(|_args, ctx| async move {
                ctx.log().info("step one");
                ctx.log().warning("step two");
                Ok(json!("done"))
            })
            .register(&mut catalog)
            .unwrap();
        let executor = executor_with(ServerSettings::default(), None);
        let tool = catalog.get("chatty.run").unwrap().clone();

        let result = executor
            .call_tool(
                Some(tool),
                &call_params("chatty.run", json!({})),
                None,
                LoggingLevel::Info,
            )
            .await;

        assert!(!result.is_error);
        let meta = result.meta.unwrap();
        assert_eq!(meta["logs"][0]["message"], "step one");
        assert_eq!(meta["logs"][1]["level"], "warning");
        // Mirrored for clients that ignore _meta.
        let structured = result.structured_content.unwrap();
        assert_eq!(structured["result"], "done");
        assert_eq!(structured["logs"][0]["message"], "step one");
    }

    #[tokio::test]
    async fn auth_pending_returns_url_without_error() {
        let mut catalog = ToolCatalog::new();
        ToolkitBuilder::new("gmail")
            .tool("send", "Needs auth", json!({"type": "object"}))
            .requires_auth("google", "oauth2", vec!["email".into()])
            .handler(|_args, _ctx| async move { Ok(json!("sent")) })
            .register(&mut catalog)
            .unwrap();

        let executor = executor_with(
            ServerSettings::default(),
            Some(Arc::new(MockAuthorizer::new())),
        );
        let tool = catalog.get("gmail.send").unwrap().clone();

        let result = executor
            .call_tool(
                Some(tool),
                &call_params("gmail.send", json!({})),
                None,
                LoggingLevel::Info,
            )
            .await;
        assert!(!result.is_error);
        match &result.content[0] {
            Content::Text { text } => assert!(text.contains("/mock-auth/google/")),
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_completed_attaches_token() {
        let mut catalog = ToolCatalog::new();
        ToolkitBuilder::new("gmail")
            .tool("send", "Needs auth", json!({"type": "object"}))
            .requires_auth("google", "oauth2", vec![])
            .handler(|_args, ctx| async move {
                Ok(json!({
                    "token": ctx.authorization.and_then(|a| a.token),
                }))
            })
            .register(&mut catalog)
            .unwrap();

        let mut tokens = HashMap::new();
        tokens.insert("u1".to_string(), "tok".to_string());
        let authorizer = MockAuthorizer::new().with_provider(
            "google",
            MockProvider {
                scopes: vec![],
                mock_tokens: tokens,
            },
        );
        let mut settings = ServerSettings::default();
        settings.user_id = Some("u1".to_string());
        let executor = executor_with(settings, Some(Arc::new(authorizer)));
        let tool = catalog.get("gmail.send").unwrap().clone();

        let result = executor
            .call_tool(
                Some(tool),
                &call_params("gmail.send", json!({})),
                None,
                LoggingLevel::Info,
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(result.structured_content.unwrap()["token"], "tok");
    }

    #[tokio::test]
    async fn auth_without_authorizer_returns_instruction() {
        let mut catalog = ToolCatalog::new();
        ToolkitBuilder::new("gmail")
            .tool("send", "Needs auth", json!({"type": "object"}))
            .requires_auth("google", "oauth2", vec![])
            .handler(|_args, _ctx| async move { Ok(json!("sent")) })
            .register(&mut catalog)
            .unwrap();
        let executor = executor_with(ServerSettings::default(), None);
        let tool = catalog.get("gmail.send").unwrap().clone();

        let result = executor
            .call_tool(
                Some(tool),
                &call_params("gmail.send", json!({})),
                None,
                LoggingLevel::Info,
            )
            .await;
        assert!(result.is_error);
        match &result.content[0] {
            Content::Text { text } => assert!(text.contains("ARCADE_API_KEY")),
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_disabled_skips_authorizer() {
        let mut catalog = ToolCatalog::new();
        ToolkitBuilder::new("gmail")
            .tool("send", "Needs auth", json!({"type": "object"}))
            .requires_auth("google", "oauth2", vec![])
            .handler(|_args, _ctx| async move { Ok(json!("sent")) })
            .register(&mut catalog)
            .unwrap();
        let mut settings = ServerSettings::default();
        settings.auth_disabled = true;
        let executor = executor_with(settings, None);
        let tool = catalog.get("gmail.send").unwrap().clone();

        let result = executor
            .call_tool(
                Some(tool),
                &call_params("gmail.send", json!({})),
                None,
                LoggingLevel::Info,
            )
            .await;
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn null_return_yields_empty_content() {
        let mut catalog = ToolCatalog::new();
        ToolkitBuilder::new("quiet")
            .tool("noop", "Returns nothing", json!({"type": "object"}))
            .handler(|_args, _ctx| async move { Ok(Value::Null) })
            .register(&mut catalog)
            .unwrap();
        let executor = executor_with(ServerSettings::default(), None);
        let tool = catalog.get("quiet.noop").unwrap().clone();

        let result = executor
            .call_tool(
                Some(tool),
                &call_params("quiet.noop", json!({})),
                None,
                LoggingLevel::Info,
            )
            .await;
        assert!(!result.is_error);
        assert!(result.content.is_empty());
        assert!(result.structured_content.is_none());
    }

    #[tokio::test]
    async fn progress_token_extracted_from_meta() {
        let mut catalog = ToolCatalog::new();
        ToolkitBuilder::new("slow")
            .tool("work", "Reports its token", json!({"type": "object"}))
            .handler(|_args, ctx| async move {
                Ok(json!({"token": ctx.progress().token().map(ToString::to_string)}))
            })
            .register(&mut catalog)
            .unwrap();
        let executor = executor_with(ServerSettings::default(), None);
        let tool = catalog.get("slow.work").unwrap().clone();

        let params = CallToolParams {
            name: "slow.work".into(),
            arguments: json!({}),
            meta: Some(RequestMeta {
                progress_token: Some(ProgressToken::String("tok-9".into())),
            }),
        };
        let result = executor
            .call_tool(Some(tool), &params, None, LoggingLevel::Info)
            .await;
        assert_eq!(result.structured_content.unwrap()["token"], "tok-9");
    }
}
