//! Transport-independent MCP server core.
//!
//! Owns the catalog-backed managers, the notification manager, the session
//! table, and the dispatcher implementing the request/notification/response
//! contract. Transports feed raw lines (or parsed values) in and write the
//! returned envelopes back out; everything else happens here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::catalog::{MaterializedTool, ToolCatalog};
use crate::config::ServerSettings;
use crate::error::{codes, Error, Result};
use crate::server::auth::{Authorizer, RemoteAuthorizer};
use crate::server::execution::ToolExecutor;
use crate::server::middleware::{MiddlewareChain, MiddlewareContext};
use crate::server::notifications::{NotificationManager, NotificationSender};
use crate::server::registry::{
    PromptEntry, PromptManager, ResourceEntry, ResourceManager, ToolManager,
};
use crate::server::session::Session;
use crate::types::capabilities::ServerCapabilities;
use crate::types::jsonrpc::{ClientMessage, JsonRpcResponse, RequestId};
use crate::types::protocol::{
    CallToolParams, CancelledParams, GetPromptParams, Implementation, InitializeParams,
    InitializeResult, ListPromptsParams, ListPromptsResult, ListResourceTemplatesParams,
    ListResourceTemplatesResult, ListResourcesParams, ListResourcesResult, ListToolsParams,
    ListToolsResult, LoggingLevel, ReadResourceParams, SetLevelParams, SubscribeParams,
    SubscribeResult, SubscriptionInfo, UnsubscribeParams, UnsubscribeResult,
};

const INSTRUCTIONS: &str = "This server provides access to tools defined in Arcade toolkits. \
     Use 'tools/list' to see available tools and 'tools/call' to execute them.";

/// Shared session table; the notification sender resolves client ids
/// through it.
#[derive(Default)]
struct SessionTable {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionTable {
    fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(session_id).cloned()
    }
}

/// Delivers notifications by writing one JSON message onto the target
/// session's outbound queue.
struct SessionNotificationSender {
    table: Arc<SessionTable>,
}

#[async_trait]
impl NotificationSender for SessionNotificationSender {
    async fn send_notification(&self, client_id: &str, payload: Value) -> bool {
        match self.table.get(client_id) {
            Some(session) => session.send(payload).await,
            None => false,
        }
    }
}

type InflightKey = (String, String);

/// The MCP server: dispatcher, managers, sessions.
pub struct McpServer {
    settings: Arc<ServerSettings>,
    info: Implementation,
    capabilities: ServerCapabilities,
    tools: RwLock<ToolManager>,
    resources: RwLock<ResourceManager>,
    prompts: RwLock<PromptManager>,
    notifications: Arc<NotificationManager>,
    executor: Arc<ToolExecutor>,
    middleware: MiddlewareChain,
    table: Arc<SessionTable>,
    client_log_levels: RwLock<HashMap<String, LoggingLevel>>,
    // (session id, request id) to abort handle for best-effort cancellation.
    inflight: Mutex<HashMap<InflightKey, tokio::task::AbortHandle>>,
    started: AtomicBool,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("tools", &self.tools.read().len())
            .field("sessions", &self.table.sessions.read().len())
            .finish()
    }
}

impl McpServer {
    /// Build a server over a loaded catalog.
    ///
    /// When `ARCADE_API_KEY` is configured the remote authorizer is used;
    /// otherwise auth-required tools return a configuration instruction.
    pub fn new(catalog: ToolCatalog, settings: ServerSettings) -> Arc<Self> {
        let authorizer: Option<Arc<dyn Authorizer>> = match &settings.api_key {
            Some(key) => match RemoteAuthorizer::new(key.clone(), settings.api_url.clone()) {
                Ok(authorizer) => {
                    tracing::info!(
                        target: "mcp.server",
                        url = %settings.api_url,
                        "using remote authorizer"
                    );
                    Some(Arc::new(authorizer))
                },
                Err(err) => {
                    tracing::warn!(target: "mcp.server", error = %err, "failed to build authorizer");
                    None
                },
            },
            None => {
                tracing::warn!(
                    target: "mcp.server",
                    "no API key configured; tools requiring auth will return an instruction"
                );
                None
            },
        };
        Self::with_authorizer(catalog, settings, authorizer)
    }

    /// Build a server with an explicit authorizer (or none).
    pub fn with_authorizer(
        catalog: ToolCatalog,
        settings: ServerSettings,
        authorizer: Option<Arc<dyn Authorizer>>,
    ) -> Arc<Self> {
        let settings = Arc::new(settings);
        let table = Arc::new(SessionTable::default());
        let notifications = Arc::new(NotificationManager::new(
            Arc::new(SessionNotificationSender { table: table.clone() }),
            settings.rate_limit_per_minute,
            settings.debounce_ms,
        ));

        let mut tools = ToolManager::new(catalog);
        let mut resources = ResourceManager::new();
        let mut prompts = PromptManager::new();
        tools.set_update_hook(list_changed_hook(&notifications, ListChanged::Tools));
        resources.set_update_hook(list_changed_hook(&notifications, ListChanged::Resources));
        prompts.set_update_hook(list_changed_hook(&notifications, ListChanged::Prompts));

        let executor = Arc::new(ToolExecutor::new(
            settings.clone(),
            notifications.clone(),
            authorizer,
        ));

        Arc::new(Self {
            info: Implementation {
                name: settings.server_name.clone(),
                version: settings.server_version.clone(),
                title: settings.server_title.clone(),
            },
            capabilities: ServerCapabilities::advertised(),
            tools: RwLock::new(tools),
            resources: RwLock::new(resources),
            prompts: RwLock::new(prompts),
            notifications,
            executor,
            middleware: MiddlewareChain::new(
                settings.mask_error_details,
                settings.enable_logging_middleware,
            ),
            table,
            client_log_levels: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            settings,
        })
    }

    /// Server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Notification manager handle.
    pub fn notifications(&self) -> &Arc<NotificationManager> {
        &self.notifications
    }

    /// Emit `notifications/resources/updated` for a URI, stamped with the
    /// current time and debounced under the URI key.
    pub async fn notify_resource_updated(&self, uri: &str, clients: Option<Vec<String>>) {
        let timestamp = chrono::Utc::now().to_rfc3339();
        self.notifications
            .notify_resource_updated(uri, Some(timestamp), clients, None, None)
            .await;
    }

    /// Start background managers. Safe to call more than once.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notifications.start();
    }

    /// Stop background managers and close every session's outbound stream.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.notifications.stop();
        let sessions: Vec<Arc<Session>> = self.table.sessions.write().drain().map(|(_, s)| s).collect();
        for session in sessions {
            self.notifications.unregister_client(&session.session_id);
            session.close().await;
        }
        tracing::info!(target: "mcp.server", "server shutdown complete");
    }

    /// Append user middleware (outermost layer). Install before taking
    /// traffic; in-flight dispatches see the chain as of their start.
    pub fn add_middleware(&self, middleware: Arc<dyn crate::server::middleware::Middleware>) {
        self.middleware.push(middleware);
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Create and register a session, returning it with the receiving half
    /// of its outbound queue.
    pub fn create_session(
        &self,
        session_id: impl Into<String>,
    ) -> (Arc<Session>, mpsc::Receiver<Option<Value>>) {
        let session_id = session_id.into();
        let user_id = std::env::var(crate::config::ENV_USER_ID)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.settings.user_id.clone())
            .unwrap_or_else(|| session_id.clone());

        let (session, rx) = Session::new(
            session_id.clone(),
            user_id,
            self.settings.outbound_queue_capacity,
            self.settings.client_request_timeout,
        );
        self.table
            .sessions
            .write()
            .insert(session_id.clone(), session.clone());
        self.notifications
            .register_client(&session_id, NotificationManager::supported_methods());
        tracing::info!(target: "mcp.server", session = %session_id, "session created");
        (session, rx)
    }

    /// Remove a session and its notification registration.
    pub fn remove_session(&self, session_id: &str) {
        self.table.sessions.write().remove(session_id);
        self.notifications.unregister_client(session_id);
        self.client_log_levels.write().remove(session_id);
        tracing::info!(target: "mcp.server", session = %session_id, "session removed");
    }

    /// Look up a session by id.
    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.table.get(session_id)
    }

    /// Snapshot of all live sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.table.sessions.read().values().cloned().collect()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.table.sessions.read().len()
    }

    // ------------------------------------------------------------------
    // Component registration
    // ------------------------------------------------------------------

    /// Add or replace a tool (equality-gated; changes notify subscribers).
    pub fn add_tool(&self, tool: MaterializedTool) {
        self.tools.write().add(tool);
    }

    /// Add or replace a resource.
    pub fn add_resource(&self, entry: ResourceEntry) {
        self.resources.write().add(entry);
    }

    /// Remove a resource by URI.
    pub fn remove_resource(&self, uri: &str) -> Result<ResourceEntry> {
        self.resources.write().remove(uri)
    }

    /// Add or replace a prompt.
    pub fn add_prompt(&self, entry: PromptEntry) {
        self.prompts.write().add(entry);
    }

    /// Remove a prompt by name.
    pub fn remove_prompt(&self, name: &str) -> Result<PromptEntry> {
        self.prompts.write().remove(name)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Handle one raw wire line. Returns the response to write back, if any.
    pub async fn handle_line(
        &self,
        line: &str,
        session: Option<&Arc<Session>>,
    ) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                return Some(JsonRpcResponse::error(
                    RequestId::Null,
                    codes::PARSE_ERROR,
                    format!("invalid JSON: {err}"),
                ));
            },
        };
        self.handle_value(value, session).await
    }

    /// Handle one parsed JSON value.
    pub async fn handle_value(
        &self,
        value: Value,
        session: Option<&Arc<Session>>,
    ) -> Option<JsonRpcResponse> {
        let message = match ClientMessage::classify(value) {
            Ok(message) => message,
            Err(err) => {
                return Some(JsonRpcResponse::error(
                    RequestId::Null,
                    codes::INVALID_REQUEST,
                    err.to_string(),
                ));
            },
        };
        self.handle_message(message, session).await
    }

    /// Handle a classified message per the dispatch contract.
    pub async fn handle_message(
        &self,
        message: ClientMessage,
        session: Option<&Arc<Session>>,
    ) -> Option<JsonRpcResponse> {
        if let Some(session) = session {
            session.touch();
        }
        match message {
            // Responses to server-initiated requests route to the request
            // manager before any method dispatch.
            ClientMessage::Response { id, result, error } => {
                if let Some(session) = session {
                    session.request_manager.resolve_response(&id, result, error);
                }
                None
            },
            ClientMessage::Notification { method, params } => {
                self.handle_notification(&method, params, session).await;
                None
            },
            ClientMessage::Request { id, method, params } => {
                Some(self.handle_request(id, &method, params, session).await)
            },
        }
    }

    async fn handle_notification(
        &self,
        method: &str,
        params: Option<Value>,
        session: Option<&Arc<Session>>,
    ) {
        match method {
            "notifications/initialized" => {
                if let Some(session) = session {
                    session.mark_initialized();
                    tracing::debug!(
                        target: "mcp.server",
                        session = %session.session_id,
                        "session initialized"
                    );
                }
            },
            "notifications/cancelled" => {
                // Informational; abort the in-flight task if it still runs.
                let Ok(params) =
                    serde_json::from_value::<CancelledParams>(params.unwrap_or(Value::Null))
                else {
                    return;
                };
                tracing::info!(
                    target: "mcp.server",
                    request_id = %params.request_id,
                    reason = params.reason.as_deref(),
                    "client cancelled request"
                );
                let key = (
                    session.map(|s| s.session_id.clone()).unwrap_or_default(),
                    params.request_id.to_string(),
                );
                if let Some(handle) = self.inflight.lock().get(&key) {
                    handle.abort();
                }
            },
            other => {
                tracing::debug!(target: "mcp.server", method = other, "ignoring notification");
            },
        }
    }

    async fn handle_request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
        session: Option<&Arc<Session>>,
    ) -> JsonRpcResponse {
        // Initialization gate: only initialize and ping pass early.
        if let Some(session) = session {
            if !session.is_initialized() && method != "initialize" && method != "ping" {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_REQUEST,
                    "Request not allowed before initialization is complete",
                );
            }
        }

        let ctx = MiddlewareContext::new(
            method,
            Some(id.clone()),
            session.map(|s| s.session_id.clone()),
        );
        if let Err(err) = self.middleware.before(&ctx, &params).await {
            let response = self.middleware.map_error(&ctx, &err);
            self.middleware.after(&ctx, &response).await;
            return response;
        }

        let outcome = self.dispatch(&id, method, params, session).await;
        let response = match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => self.middleware.map_error(&ctx, &err),
        };
        self.middleware.after(&ctx, &response).await;
        response
    }

    async fn dispatch(
        &self,
        id: &RequestId,
        method: &str,
        params: Option<Value>,
        session: Option<&Arc<Session>>,
    ) -> Result<Value> {
        match method {
            "ping" => Ok(json!({})),
            "initialize" => {
                let params: InitializeParams = parse_optional(params)?;
                to_value(self.handle_initialize(params, session))
            },
            "tools/list" => {
                let _params: ListToolsParams = parse_optional(params)?;
                let result = ListToolsResult {
                    tools: self.tools.read().list_tools(),
                    next_cursor: None,
                };
                to_value(result)
            },
            "tools/call" => {
                let params: CallToolParams = parse_required(params)?;
                self.handle_call_tool(id, params, session).await
            },
            "resources/list" => {
                let _params: ListResourcesParams = parse_optional(params)?;
                let result = ListResourcesResult {
                    resources: self.resources.read().list(),
                    next_cursor: None,
                };
                to_value(result)
            },
            "resources/templates/list" => {
                let _params: ListResourceTemplatesParams = parse_optional(params)?;
                let result = ListResourceTemplatesResult {
                    resource_templates: self.resources.read().list_templates(),
                    next_cursor: None,
                };
                to_value(result)
            },
            "resources/read" => {
                let params: ReadResourceParams = parse_required(params)?;
                let handler = self.resources.read().handler_for(&params.uri)?;
                let result = handler.read(&params.uri).await?;
                to_value(result)
            },
            "prompts/list" => {
                let _params: ListPromptsParams = parse_optional(params)?;
                let result = ListPromptsResult {
                    prompts: self.prompts.read().list(),
                    next_cursor: None,
                };
                to_value(result)
            },
            "prompts/get" => {
                let params: GetPromptParams = parse_required(params)?;
                let entry = self.prompts.read().get_entry(&params.name)?;
                let result = entry.render_validated(params.arguments).await?;
                to_value(result)
            },
            "logging/setLevel" => {
                let params: SetLevelParams = parse_required(params)?;
                let key = session
                    .map(|s| s.session_id.clone())
                    .unwrap_or_else(|| "default".to_string());
                self.client_log_levels.write().insert(key, params.level);
                Ok(json!({}))
            },
            "notifications/subscribe" => {
                let params: SubscribeParams = parse_required(params)?;
                let session = session.ok_or_else(|| {
                    Error::Session("subscriptions require an active session".into())
                })?;
                let subscriptions = self
                    .notifications
                    .subscribe(&session.session_id, &params.methods, params.filters)?
                    .into_iter()
                    .map(|s| SubscriptionInfo {
                        subscription_id: s.id,
                        method: s.method,
                    })
                    .collect();
                to_value(SubscribeResult { subscriptions })
            },
            "notifications/unsubscribe" => {
                let params: UnsubscribeParams = parse_required(params)?;
                let session = session.ok_or_else(|| {
                    Error::Session("subscriptions require an active session".into())
                })?;
                let success = self
                    .notifications
                    .unsubscribe(&session.session_id, &params.subscription_ids);
                to_value(UnsubscribeResult { success })
            },
            other => Err(Error::not_found(format!("Method not found: {other}"))),
        }
    }

    fn handle_initialize(
        &self,
        params: InitializeParams,
        session: Option<&Arc<Session>>,
    ) -> InitializeResult {
        let negotiated =
            if crate::SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
                params.protocol_version.clone()
            } else {
                crate::LATEST_PROTOCOL_VERSION.to_string()
            };
        if let Some(session) = session {
            session.begin_initialize(params, negotiated.clone());
        }
        InitializeResult {
            protocol_version: negotiated,
            capabilities: self.capabilities.clone(),
            server_info: self.info.clone(),
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }

    async fn handle_call_tool(
        &self,
        id: &RequestId,
        params: CallToolParams,
        session: Option<&Arc<Session>>,
    ) -> Result<Value> {
        let tool = self.tools.read().get(&params.name).ok().cloned();
        let min_level = {
            let levels = self.client_log_levels.read();
            session
                .and_then(|s| levels.get(&s.session_id).copied())
                .or_else(|| levels.get("default").copied())
                .unwrap_or(LoggingLevel::Info)
        };

        let executor = self.executor.clone();
        let session_owned = session.cloned();
        let task = tokio::spawn(async move {
            executor
                .call_tool(tool, &params, session_owned.as_ref(), min_level)
                .await
        });

        let key: InflightKey = (
            session.map(|s| s.session_id.clone()).unwrap_or_default(),
            id.to_string(),
        );
        self.inflight.lock().insert(key.clone(), task.abort_handle());
        let outcome = task.await;
        self.inflight.lock().remove(&key);

        let result = match outcome {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => {
                crate::types::protocol::CallToolResult::error("Tool call cancelled")
            },
            Err(err) => {
                tracing::error!(target: "mcp.server", error = %err, "tool task failed");
                crate::types::protocol::CallToolResult::error("Internal server error")
            },
        };
        to_value(result)
    }

}

enum ListChanged {
    Tools,
    Resources,
    Prompts,
}

/// Update hook broadcasting `*/list_changed` to subscribers. A no-op outside
/// a runtime so startup seeding stays silent.
fn list_changed_hook(
    notifications: &Arc<NotificationManager>,
    kind: ListChanged,
) -> crate::server::registry::UpdateHook {
    let notifications = notifications.clone();
    Arc::new(move |_key: &str| {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let notifications = notifications.clone();
        match kind {
            ListChanged::Tools => {
                handle.spawn(async move { notifications.notify_tool_list_changed(None).await });
            },
            ListChanged::Resources => {
                handle
                    .spawn(async move { notifications.notify_resource_list_changed(None).await });
            },
            ListChanged::Prompts => {
                handle.spawn(async move { notifications.notify_prompt_list_changed(None).await });
            },
        }
    })
}

/// Params that default when absent; present-but-wrong is a validation error.
fn parse_optional<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("invalid params: {e}"))),
    }
}

/// Params that must be present and well-formed.
fn parse_required<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let value = params.ok_or_else(|| Error::validation("missing params"))?;
    serde_json::from_value(value).map_err(|e| Error::validation(format!("invalid params: {e}")))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::internal(format!("serialization failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolkitBuilder;
    use pretty_assertions::assert_eq;

    fn test_server() -> Arc<McpServer> {
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

    async fn initialize(server: &Arc<McpServer>, session: &Arc<Session>) {
        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"t","version":"1"}}}"#,
                Some(session),
            )
            .await
            .unwrap();
        assert!(resp.result().is_some());
        let none = server
            .handle_line(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                Some(session),
            )
            .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn ping_works_in_every_state() {
        let server = test_server();
        let (session, _rx) = server.create_session("s1");

        let resp = server
            .handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#, Some(&session))
            .await
            .unwrap();
        assert_eq!(resp.id, RequestId::Number(7));
        assert_eq!(resp.result(), Some(&json!({})));

        initialize(&server, &session).await;
        let resp = server
            .handle_line(r#"{"jsonrpc":"2.0","id":8,"method":"ping"}"#, Some(&session))
            .await
            .unwrap();
        assert_eq!(resp.result(), Some(&json!({})));
    }

    #[tokio::test]
    async fn requests_rejected_before_initialized() {
        let server = test_server();
        let (session, _rx) = server.create_session("s1");

        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
                Some(&session),
            )
            .await
            .unwrap();
        assert_eq!(resp.error_object().unwrap().code, codes::INVALID_REQUEST);

        // Still rejected between initialize and notifications/initialized.
        server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
                Some(&session),
            )
            .await
            .unwrap();
        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#,
                Some(&session),
            )
            .await
            .unwrap();
        assert_eq!(resp.error_object().unwrap().code, codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn initialize_negotiates_version_and_lists_tools() {
        let server = test_server();
        let (session, _rx) = server.create_session("s1");
        initialize(&server, &session).await;

        assert_eq!(
            session.negotiated_version().as_deref(),
            Some(crate::LATEST_PROTOCOL_VERSION)
        );

        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
                Some(&session),
            )
            .await
            .unwrap();
        let result = resp.result().unwrap();
        assert_eq!(result["tools"][0]["name"], "math.add");
        assert!(result["tools"][0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn unsupported_version_negotiates_down() {
        let server = test_server();
        let (session, _rx) = server.create_session("s1");
        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"1999-01-01"}}"#,
                Some(&session),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.result().unwrap()["protocolVersion"],
            crate::LATEST_PROTOCOL_VERSION
        );
    }

    #[tokio::test]
    async fn tool_call_returns_structured_result() {
        let server = test_server();
        let (session, _rx) = server.create_session("s1");
        initialize(&server, &session).await;

        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"math.add","arguments":{"a":2,"b":3}}}"#,
                Some(&session),
            )
            .await
            .unwrap();
        let result = resp.result().unwrap();
        assert_eq!(result["structuredContent"], json!({"result": 5}));
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_result_not_an_error() {
        let server = test_server();
        let (session, _rx) = server.create_session("s1");
        initialize(&server, &session).await;

        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"nope","arguments":{}}}"#,
                Some(&session),
            )
            .await
            .unwrap();
        assert!(resp.error_object().is_none());
        let result = resp.result().unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "Unknown tool: nope");
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let server = test_server();
        let (session, _rx) = server.create_session("s1");
        initialize(&server, &session).await;

        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":5,"method":"does/not/exist"}"#,
                Some(&session),
            )
            .await
            .unwrap();
        assert_eq!(resp.error_object().unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_json_and_non_object_messages() {
        let server = test_server();
        let resp = server.handle_line("{not json", None).await.unwrap();
        assert_eq!(resp.error_object().unwrap().code, codes::PARSE_ERROR);
        assert_eq!(resp.id, RequestId::Null);

        let resp = server.handle_line("[1,2,3]", None).await.unwrap();
        assert_eq!(resp.error_object().unwrap().code, codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn client_responses_route_to_request_manager() {
        let server = test_server();
        let (session, mut rx) = server.create_session("s1");
        initialize(&server, &session).await;

        let rm = session.request_manager.clone();
        let waiter = tokio::spawn(async move { rm.send_request("roots/list", None, None).await });
        let sent = rx.recv().await.unwrap().unwrap();
        let request_id = sent["id"].as_str().unwrap().to_string();

        let none = server
            .handle_line(
                &format!(r#"{{"jsonrpc":"2.0","id":"{request_id}","result":{{"roots":[]}}}}"#),
                Some(&session),
            )
            .await;
        assert!(none.is_none());
        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result["roots"], json!([]));
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_flow() {
        let server = test_server();
        let (session, _rx) = server.create_session("s1");
        initialize(&server, &session).await;

        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":6,"method":"notifications/subscribe","params":{"methods":["notifications/tools/list_changed","not/a/method"]}}"#,
                Some(&session),
            )
            .await
            .unwrap();
        let subs = resp.result().unwrap()["subscriptions"].clone();
        assert_eq!(subs.as_array().unwrap().len(), 1);
        let sub_id = subs[0]["subscription_id"].as_str().unwrap().to_string();

        let resp = server
            .handle_line(
                &format!(
                    r#"{{"jsonrpc":"2.0","id":7,"method":"notifications/unsubscribe","params":{{"subscription_ids":["{sub_id}"]}}}}"#
                ),
                Some(&session),
            )
            .await
            .unwrap();
        assert_eq!(resp.result().unwrap()["success"], true);
    }

    #[tokio::test]
    async fn set_log_level_per_session() {
        let server = test_server();
        let (session, _rx) = server.create_session("s1");
        initialize(&server, &session).await;

        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":8,"method":"logging/setLevel","params":{"level":"warning"}}"#,
                Some(&session),
            )
            .await
            .unwrap();
        assert_eq!(resp.result(), Some(&json!({})));
        assert_eq!(
            server.client_log_levels.read().get("s1"),
            Some(&LoggingLevel::Warning)
        );
    }

    #[tokio::test]
    async fn missing_resource_maps_to_resource_not_found() {
        let server = test_server();
        let (session, _rx) = server.create_session("s1");
        initialize(&server, &session).await;

        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":9,"method":"resources/read","params":{"uri":"file://ghost"}}"#,
                Some(&session),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.error_object().unwrap().code,
            codes::RESOURCE_NOT_FOUND
        );
    }

    #[tokio::test]
    async fn stop_closes_outbound_queues() {
        let server = test_server();
        server.start();
        let (_session, mut rx) = server.create_session("s1");
        server.stop().await;
        // The close sentinel ends the stream.
        assert!(rx.recv().await.unwrap().is_none());
        assert_eq!(server.session_count(), 0);
    }
}
