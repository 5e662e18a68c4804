//! Server-to-client request correlation.
//!
//! The server can issue its own JSON-RPC requests over a session's outbound
//! stream (sampling, elicitation, roots). Responses coming back from the
//! client are matched to the waiting future by id; unknown ids are dropped
//! silently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::jsonrpc::{JsonRpcError, RequestId, JSONRPC_VERSION};

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>>;

/// Correlates server-initiated requests with client responses.
#[derive(Clone)]
pub struct RequestManager {
    outbound: mpsc::Sender<Option<Value>>,
    pending: Pending,
    default_timeout: Duration,
}

impl std::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManager")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl RequestManager {
    /// Create a manager writing onto a session's outbound queue.
    pub fn new(outbound: mpsc::Sender<Option<Value>>, default_timeout: Duration) -> Self {
        Self {
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            default_timeout,
        }
    }

    /// Send a request to the client and await its response.
    ///
    /// Allocates a UUID id, writes the envelope to the outbound queue
    /// (blocking when the queue is full), and resolves when the client
    /// answers or the timeout elapses.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let mut payload = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": request_id,
            "method": method,
        });
        if let Some(params) = params {
            payload["params"] = params;
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        if self.outbound.send(Some(payload)).await.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(Error::Session("session output stream closed".into()));
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        let outcome = tokio::time::timeout(timeout, rx).await;
        self.pending.lock().remove(&request_id);

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Session("session closed while awaiting response".into())),
            Err(_) => Err(Error::Timeout(format!(
                "no response to '{method}' within {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Deliver a client response to the waiting future.
    ///
    /// Messages with an unknown id are dropped; the client may be answering
    /// a request that already timed out.
    pub fn resolve_response(
        &self,
        id: &RequestId,
        result: Option<Value>,
        error: Option<JsonRpcError>,
    ) {
        let key = id.to_string();
        let Some(tx) = self.pending.lock().remove(&key) else {
            tracing::debug!(
                target: "mcp.requests",
                id = %key,
                "response for unknown request id; dropping"
            );
            return;
        };
        let outcome = match error {
            Some(err) => Err(Error::Protocol(format!(
                "client error {}: {}",
                err.code, err.message
            ))),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(outcome);
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_queue(capacity: usize) -> (RequestManager, mpsc::Receiver<Option<Value>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (RequestManager::new(tx, Duration::from_secs(60)), rx)
    }

    #[tokio::test]
    async fn request_resolves_with_client_result() {
        let (manager, mut rx) = manager_with_queue(8);
        let resolver = manager.clone();

        let task = tokio::spawn(async move {
            manager
                .send_request("sampling/createMessage", Some(json!({"x": 1})), None)
                .await
        });

        let sent = rx.recv().await.unwrap().unwrap();
        assert_eq!(sent["method"], "sampling/createMessage");
        assert_eq!(sent["params"]["x"], 1);
        let id = RequestId::String(sent["id"].as_str().unwrap().to_string());

        resolver.resolve_response(&id, Some(json!({"answer": 42})), None);
        let result = task.await.unwrap().unwrap();
        assert_eq!(result["answer"], 42);
        assert_eq!(resolver.pending_count(), 0);
    }

    #[tokio::test]
    async fn request_resolves_with_client_error() {
        let (manager, mut rx) = manager_with_queue(8);
        let resolver = manager.clone();

        let task = tokio::spawn(async move {
            manager.send_request("roots/list", None, None).await
        });

        let sent = rx.recv().await.unwrap().unwrap();
        let id = RequestId::String(sent["id"].as_str().unwrap().to_string());
        resolver.resolve_response(
            &id,
            None,
            Some(JsonRpcError {
                code: -32601,
                message: "unsupported".into(),
                data: None,
            }),
        );
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out() {
        let (manager, mut rx) = manager_with_queue(8);
        let task = tokio::spawn(async move {
            manager
                .send_request("roots/list", None, Some(Duration::from_secs(5)))
                .await
        });
        let _sent = rx.recv().await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn unknown_response_id_is_dropped() {
        let (manager, _rx) = manager_with_queue(8);
        // Must not panic or hang.
        manager.resolve_response(&RequestId::String("ghost".into()), Some(json!(1)), None);
        assert_eq!(manager.pending_count(), 0);
    }
}
