//! Per-connection session state.
//!
//! A session tracks the initialization state machine, caches the client's
//! declared capabilities, owns the bounded outbound queue the transports
//! drain, and carries the request manager for server-to-client calls.
//!
//! The state machine is `NotInitialized -> Initializing` (on the
//! `initialize` request) `-> Initialized` (on `notifications/initialized`).
//! Until then the dispatcher rejects everything except `initialize` and
//! `ping` with -32600.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::server::requests::RequestManager;
use crate::types::capabilities::ClientCapabilities;
use crate::types::protocol::InitializeParams;

/// Initialization state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializationState {
    /// No `initialize` request seen yet
    NotInitialized,
    /// `initialize` answered, waiting for `notifications/initialized`
    Initializing,
    /// Fully initialized
    Initialized,
}

/// One MCP connection's state.
pub struct Session {
    /// Session identifier (doubles as the notification client id)
    pub session_id: String,
    /// User identity bound to this connection
    pub user_id: String,
    state: RwLock<InitializationState>,
    client_params: RwLock<Option<InitializeParams>>,
    negotiated_version: RwLock<Option<String>>,
    last_active: Mutex<Instant>,
    outbound: mpsc::Sender<Option<Value>>,
    /// Correlates server-to-client requests with responses
    pub request_manager: RequestManager,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl Session {
    /// Create a session with a bounded outbound queue.
    ///
    /// Returns the session and the receiving half of its queue; the
    /// transport drains the receiver FIFO. A `None` item is the close
    /// sentinel.
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        queue_capacity: usize,
        client_request_timeout: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<Option<Value>>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let session = Arc::new(Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            state: RwLock::new(InitializationState::NotInitialized),
            client_params: RwLock::new(None),
            negotiated_version: RwLock::new(None),
            last_active: Mutex::new(Instant::now()),
            outbound: tx.clone(),
            request_manager: RequestManager::new(tx, client_request_timeout),
        });
        (session, rx)
    }

    /// Current initialization state.
    pub fn state(&self) -> InitializationState {
        *self.state.read()
    }

    /// Whether non-init, non-ping requests may be dispatched.
    pub fn is_initialized(&self) -> bool {
        self.state() == InitializationState::Initialized
    }

    /// Record the client's `initialize` params and move to Initializing.
    pub fn begin_initialize(&self, params: InitializeParams, negotiated_version: String) {
        *self.client_params.write() = Some(params);
        *self.negotiated_version.write() = Some(negotiated_version);
        *self.state.write() = InitializationState::Initializing;
    }

    /// `notifications/initialized` arrived; the session is fully open.
    pub fn mark_initialized(&self) {
        *self.state.write() = InitializationState::Initialized;
    }

    /// Protocol version negotiated during initialize, if any.
    pub fn negotiated_version(&self) -> Option<String> {
        self.negotiated_version.read().clone()
    }

    /// Capabilities the client declared during initialize.
    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.client_params.read().as_ref().map(|p| p.capabilities.clone())
    }

    /// Structural subset check against the declared client capabilities.
    ///
    /// Every feature present in `needed` must be present (and for
    /// experimental keys, equal) in what the client declared.
    pub fn check_client_capability(&self, needed: &ClientCapabilities) -> bool {
        let params = self.client_params.read();
        let Some(declared) = params.as_ref().map(|p| &p.capabilities) else {
            return false;
        };

        if let Some(roots) = &needed.roots {
            match &declared.roots {
                None => return false,
                Some(have) => {
                    if roots.list_changed && !have.list_changed {
                        return false;
                    }
                },
            }
        }
        if needed.sampling.is_some() && declared.sampling.is_none() {
            return false;
        }
        if needed.elicitation.is_some() && declared.elicitation.is_none() {
            return false;
        }
        if let Some(experimental) = &needed.experimental {
            let Some(have) = &declared.experimental else {
                return false;
            };
            for (key, value) in experimental {
                if have.get(key) != Some(value) {
                    return false;
                }
            }
        }
        true
    }

    /// Refresh the inactivity timestamp.
    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Time since the last activity.
    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    /// Instant of last activity (for oldest-first eviction).
    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    /// Enqueue an outbound message, blocking while the queue is full.
    ///
    /// Returns false if the consumer side is gone.
    pub async fn send(&self, message: Value) -> bool {
        self.outbound.send(Some(message)).await.is_ok()
    }

    /// Enqueue without blocking; used on paths that must not stall.
    pub fn try_send(&self, message: Value) -> bool {
        self.outbound.try_send(Some(message)).is_ok()
    }

    /// Enqueue the close sentinel; the transport ends its stream on receipt.
    pub async fn close(&self) {
        let _ = self.outbound.send(None).await;
    }
}
