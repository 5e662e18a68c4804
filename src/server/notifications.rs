//! Notification manager: subscriptions, rate limiting, debouncing, fan-out.
//!
//! Delivery goes through a [`NotificationSender`] capability the server
//! implements by writing a JSON line onto the target session's outbound
//! queue. A failed per-client send is logged at debug and dropped; it never
//! aborts the fan-out and is never retried.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
// tokio's clock, so tests can pause and advance time deterministically.
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::jsonrpc::RequestId;
use crate::types::protocol::{
    CancelledParams, LogMessageParams, LoggingLevel, ProgressParams, ProgressToken,
    ResourceUpdatedParams, ServerNotification,
};

const DEBOUNCE_TICK: Duration = Duration::from_millis(50);
const RATE_WINDOW: Duration = Duration::from_secs(60);
const CLEANUP_TICK: Duration = Duration::from_secs(60);
const INACTIVE_AFTER: Duration = Duration::from_secs(300);

/// Transport-side capability for delivering one notification to one client.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver `payload` to `client_id`. Returns whether delivery succeeded.
    async fn send_notification(&self, client_id: &str, payload: Value) -> bool;
}

/// An active subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Server-assigned id
    pub id: String,
    /// Subscribed notification method
    pub method: String,
    /// Creation time
    pub created_at: Instant,
    /// Optional filters supplied at subscribe time
    pub filters: Option<Value>,
}

#[derive(Debug)]
struct NotificationClient {
    capabilities: Vec<String>,
    subscriptions: HashMap<String, Subscription>,
    last_notification: Instant,
    notification_count: u64,
    window_start: Instant,
    window_count: u32,
}

impl NotificationClient {
    fn new(capabilities: Vec<String>) -> Self {
        let now = Instant::now();
        Self {
            capabilities,
            subscriptions: HashMap::new(),
            last_notification: now,
            notification_count: 0,
            window_start: now,
            window_count: 0,
        }
    }

    fn subscribed_to(&self, method: &str) -> bool {
        self.subscriptions.values().any(|s| s.method == method)
    }
}

#[derive(Debug)]
struct DebouncedNotification {
    payload: Value,
    clients: HashSet<String>,
    #[allow(dead_code)]
    created_at: Instant,
    send_after: Instant,
}

struct Inner {
    sender: Arc<dyn NotificationSender>,
    rate_limit_per_minute: u32,
    default_debounce: Duration,
    clients: Mutex<HashMap<String, NotificationClient>>,
    // Keyed by (method, debounce_key); last writer wins within a window.
    debounced: Mutex<HashMap<(String, String), DebouncedNotification>>,
}

/// Central fan-out point for server-to-client notifications.
pub struct NotificationManager {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationManager")
            .field("clients", &self.inner.clients.lock().len())
            .finish()
    }
}

impl NotificationManager {
    /// Build a manager delivering through `sender`.
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        rate_limit_per_minute: u32,
        default_debounce_ms: u64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sender,
                rate_limit_per_minute,
                default_debounce: Duration::from_millis(default_debounce_ms),
                clients: Mutex::new(HashMap::new()),
                debounced: Mutex::new(HashMap::new()),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The notification methods clients may subscribe to.
    pub fn supported_methods() -> Vec<String> {
        [
            "notifications/progress",
            "notifications/message",
            "notifications/resources/updated",
            "notifications/resources/list_changed",
            "notifications/tools/list_changed",
            "notifications/prompts/list_changed",
            "notifications/cancelled",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
    }

    /// Spawn the debounce flush and inactivity cleanup loops. Idempotent.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let inner = self.inner.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(DEBOUNCE_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                flush_due_debounced(&inner).await;
            }
        }));

        let inner = self.inner.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(CLEANUP_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                cleanup_inactive_clients(&inner);
            }
        }));

        tracing::info!(target: "mcp.notifications", "notification manager started");
    }

    /// Abort background loops and clear pending debounced entries.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.debounced.lock().clear();
        tracing::info!(target: "mcp.notifications", "notification manager stopped");
    }

    /// Register a client with the notification methods it may subscribe to.
    pub fn register_client(&self, client_id: &str, capabilities: Vec<String>) {
        let mut clients = self.inner.clients.lock();
        let count = capabilities.len();
        clients.insert(client_id.to_string(), NotificationClient::new(capabilities));
        tracing::debug!(
            target: "mcp.notifications",
            client = client_id,
            capabilities = count,
            "registered client"
        );
    }

    /// Drop a client, its subscriptions, and debounced entries addressed
    /// solely to it.
    pub fn unregister_client(&self, client_id: &str) {
        self.inner.clients.lock().remove(client_id);
        self.inner.debounced.lock().retain(|_, entry| {
            entry.clients.remove(client_id);
            !entry.clients.is_empty()
        });
        tracing::debug!(target: "mcp.notifications", client = client_id, "unregistered client");
    }

    /// Create subscriptions for the given methods, silently skipping methods
    /// the client did not declare capability for.
    pub fn subscribe(
        &self,
        client_id: &str,
        methods: &[String],
        filters: Option<Value>,
    ) -> Result<Vec<Subscription>> {
        let mut clients = self.inner.clients.lock();
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| Error::not_found(format!("client '{client_id}' not registered")))?;

        let mut created = Vec::new();
        for method in methods {
            if !client.capabilities.contains(method) {
                tracing::warn!(
                    target: "mcp.notifications",
                    client = client_id,
                    method = %method,
                    "client lacks capability; skipping subscription"
                );
                continue;
            }
            let sub = Subscription {
                id: Uuid::new_v4().to_string(),
                method: method.clone(),
                created_at: Instant::now(),
                filters: filters.clone(),
            };
            client.subscriptions.insert(sub.id.clone(), sub.clone());
            created.push(sub);
        }
        Ok(created)
    }

    /// Remove subscriptions by id. Returns false when any id was unknown.
    pub fn unsubscribe(&self, client_id: &str, subscription_ids: &[String]) -> bool {
        let mut clients = self.inner.clients.lock();
        let Some(client) = clients.get_mut(client_id) else {
            return false;
        };
        let mut all_known = true;
        for id in subscription_ids {
            if client.subscriptions.remove(id).is_none() {
                all_known = false;
            }
        }
        all_known
    }

    /// Emit `notifications/progress`. Debounce key defaults to the token.
    #[allow(clippy::too_many_arguments)]
    pub async fn notify_progress(
        &self,
        progress_token: ProgressToken,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
        clients: Option<Vec<String>>,
        debounce_key: Option<String>,
        debounce_ms: Option<u64>,
    ) {
        let key = debounce_key.unwrap_or_else(|| progress_token.to_string());
        let notification = ServerNotification::Progress(ProgressParams {
            progress_token,
            progress,
            total,
            message,
        });
        self.dispatch(notification, clients, Some(key), debounce_ms)
            .await;
    }

    /// Emit `notifications/message`. Never debounced.
    pub async fn notify_message(
        &self,
        level: LoggingLevel,
        data: Value,
        logger: Option<String>,
        clients: Option<Vec<String>>,
    ) {
        let notification = ServerNotification::LogMessage(LogMessageParams {
            level,
            data,
            logger,
        });
        self.dispatch(notification, clients, None, Some(0)).await;
    }

    /// Emit `notifications/resources/updated`. Debounce key defaults to the
    /// URI.
    pub async fn notify_resource_updated(
        &self,
        uri: &str,
        timestamp: Option<String>,
        clients: Option<Vec<String>>,
        debounce_key: Option<String>,
        debounce_ms: Option<u64>,
    ) {
        let key = debounce_key.unwrap_or_else(|| uri.to_string());
        let notification = ServerNotification::ResourceUpdated(ResourceUpdatedParams {
            uri: uri.to_string(),
            timestamp,
        });
        self.dispatch(notification, clients, Some(key), debounce_ms)
            .await;
    }

    /// Emit `notifications/resources/list_changed`. Never debounced.
    pub async fn notify_resource_list_changed(&self, clients: Option<Vec<String>>) {
        self.dispatch(ServerNotification::ResourceListChanged, clients, None, None)
            .await;
    }

    /// Emit `notifications/tools/list_changed`. Never debounced.
    pub async fn notify_tool_list_changed(&self, clients: Option<Vec<String>>) {
        self.dispatch(ServerNotification::ToolListChanged, clients, None, None)
            .await;
    }

    /// Emit `notifications/prompts/list_changed`. Never debounced.
    pub async fn notify_prompt_list_changed(&self, clients: Option<Vec<String>>) {
        self.dispatch(ServerNotification::PromptListChanged, clients, None, None)
            .await;
    }

    /// Emit `notifications/cancelled`. Never debounced.
    pub async fn notify_cancelled(
        &self,
        request_id: RequestId,
        reason: Option<String>,
        clients: Option<Vec<String>>,
    ) {
        let notification = ServerNotification::Cancelled(CancelledParams { request_id, reason });
        self.dispatch(notification, clients, None, None).await;
    }

    /// Resolve targets, then either debounce or send immediately.
    async fn dispatch(
        &self,
        notification: ServerNotification,
        clients: Option<Vec<String>>,
        debounce_key: Option<String>,
        debounce_ms: Option<u64>,
    ) {
        let method = notification.method().to_string();
        let targets: Vec<String> = match clients {
            Some(ids) => ids,
            // No explicit targets: fan out to subscribers of this method.
            None => {
                let clients = self.inner.clients.lock();
                clients
                    .iter()
                    .filter(|(_, c)| c.subscribed_to(&method))
                    .map(|(id, _)| id.clone())
                    .collect()
            },
        };
        if targets.is_empty() {
            return;
        }

        let payload = notification.to_message();
        let debounce = match debounce_ms {
            Some(0) => None,
            Some(ms) => debounce_key.map(|k| (k, Duration::from_millis(ms))),
            None => debounce_key.map(|k| (k, self.inner.default_debounce)),
        };

        match debounce {
            Some((key, window)) if !window.is_zero() => {
                let mut debounced = self.inner.debounced.lock();
                let now = Instant::now();
                let entry = debounced
                    .entry((method, key))
                    .or_insert_with(|| DebouncedNotification {
                        payload: Value::Null,
                        clients: HashSet::new(),
                        created_at: now,
                        send_after: now,
                    });
                // Last writer wins; target set is the union; window extends.
                entry.payload = payload;
                entry.clients.extend(targets);
                entry.send_after = now + window;
            },
            _ => send_to_clients(&self.inner, payload, targets).await,
        }
    }

    /// Number of debounced entries waiting to flush (test hook).
    #[cfg(test)]
    fn pending_debounced(&self) -> usize {
        self.inner.debounced.lock().len()
    }
}

/// Flush debounced entries whose window has elapsed.
async fn flush_due_debounced(inner: &Arc<Inner>) {
    let due: Vec<DebouncedNotification> = {
        let mut debounced = inner.debounced.lock();
        let now = Instant::now();
        let keys: Vec<_> = debounced
            .iter()
            .filter(|(_, d)| now >= d.send_after)
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| debounced.remove(&k))
            .collect()
    };

    for entry in due {
        let targets: Vec<String> = entry.clients.into_iter().collect();
        send_to_clients(inner, entry.payload, targets).await;
    }
}

/// Fan a payload out to clients, applying the per-client rate limit.
async fn send_to_clients(inner: &Arc<Inner>, payload: Value, client_ids: Vec<String>) {
    let allowed: Vec<String> = {
        let mut clients = inner.clients.lock();
        client_ids
            .into_iter()
            .filter(|id| {
                let Some(client) = clients.get_mut(id.as_str()) else {
                    return false;
                };
                let now = Instant::now();
                if now.duration_since(client.window_start) >= RATE_WINDOW {
                    client.window_start = now;
                    client.window_count = 0;
                }
                if client.window_count >= inner.rate_limit_per_minute {
                    tracing::warn!(
                        target: "mcp.notifications",
                        client = %id,
                        "rate limit exceeded; dropping notification"
                    );
                    return false;
                }
                client.window_count += 1;
                true
            })
            .collect()
    };

    let sends = allowed.iter().map(|id| {
        let payload = payload.clone();
        async move { (id.clone(), inner.sender.send_notification(id, payload).await) }
    });
    let outcomes = futures::future::join_all(sends).await;

    let mut clients = inner.clients.lock();
    for (id, ok) in outcomes {
        if ok {
            if let Some(client) = clients.get_mut(&id) {
                client.last_notification = Instant::now();
                client.notification_count += 1;
            }
        } else {
            tracing::debug!(
                target: "mcp.notifications",
                client = %id,
                "failed to deliver notification"
            );
        }
    }
}

/// Drop clients that have been idle past the threshold and hold no
/// subscriptions.
fn cleanup_inactive_clients(inner: &Arc<Inner>) {
    let now = Instant::now();
    let mut clients = inner.clients.lock();
    clients.retain(|id, client| {
        let keep = !client.subscriptions.is_empty()
            || now.duration_since(client.last_notification) <= INACTIVE_AFTER;
        if !keep {
            tracing::debug!(target: "mcp.notifications", client = %id, "cleaned up inactive client");
        }
        keep
    });
}
