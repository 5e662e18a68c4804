//! Middleware around request dispatch.
//!
//! The chain is ordered so that error handling is innermost (always
//! present), then request logging (if enabled), then user middleware.
//! User middleware sees requests outside-in and responses inside-out; a
//! request-side error short-circuits dispatch and is mapped like any
//! handler error.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::jsonrpc::{JsonRpcResponse, RequestId};

/// Read-only context flowing through the chain.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    /// Method being dispatched
    pub method: String,
    /// Request id, absent for notifications
    pub request_id: Option<RequestId>,
    /// Session id, absent for sessionless calls
    pub session_id: Option<String>,
    /// Dispatch start time
    pub started_at: Instant,
}

impl MiddlewareContext {
    /// Context for a request.
    pub fn new(method: &str, request_id: Option<RequestId>, session_id: Option<String>) -> Self {
        Self {
            method: method.to_string(),
            request_id,
            session_id,
            started_at: Instant::now(),
        }
    }
}

/// Extension point around the dispatcher.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Observe (or veto) a request before its handler runs.
    async fn on_request(&self, _ctx: &MiddlewareContext, _params: &Option<Value>) -> Result<()> {
        Ok(())
    }

    /// Observe the response after the handler ran.
    async fn on_response(&self, _ctx: &MiddlewareContext, _response: &JsonRpcResponse) {}
}

/// Maps handler errors to JSON-RPC error responses.
///
/// Domain errors surface their message; anything else is replaced with a
/// generic message when masking is enabled.
#[derive(Debug, Clone)]
pub struct ErrorHandlingMiddleware {
    mask_error_details: bool,
}

impl ErrorHandlingMiddleware {
    /// Create with the given masking policy.
    pub fn new(mask_error_details: bool) -> Self {
        Self { mask_error_details }
    }

    /// Build the error response for a failed dispatch.
    pub fn to_response(&self, ctx: &MiddlewareContext, err: &Error) -> JsonRpcResponse {
        tracing::error!(
            target: "mcp.server",
            method = %ctx.method,
            error = %err,
            "request failed"
        );
        let message = if self.mask_error_details && !err.is_domain_error() {
            "Internal server error".to_string()
        } else {
            err.to_string()
        };
        let id = ctx.request_id.clone().unwrap_or(RequestId::Null);
        JsonRpcResponse::error(id, err.json_rpc_code(), message)
    }
}

/// Records method, ids, duration, and outcome for every dispatch.
///
/// Never logs parameter or secret values.
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn on_request(&self, ctx: &MiddlewareContext, _params: &Option<Value>) -> Result<()> {
        let request_id = ctx.request_id.as_ref().map(ToString::to_string);
        tracing::debug!(
            target: "mcp.server",
            method = %ctx.method,
            request_id = request_id.as_deref(),
            session_id = ctx.session_id.as_deref(),
            "request received"
        );
        Ok(())
    }

    async fn on_response(&self, ctx: &MiddlewareContext, response: &JsonRpcResponse) {
        let outcome = match response.error_object() {
            None => "ok".to_string(),
            Some(err) => format!("error({})", err.code),
        };
        let request_id = ctx.request_id.as_ref().map(ToString::to_string);
        tracing::info!(
            target: "mcp.server",
            method = %ctx.method,
            request_id = request_id.as_deref(),
            session_id = ctx.session_id.as_deref(),
            duration_ms = ctx.started_at.elapsed().as_millis() as u64,
            outcome = %outcome,
            "request handled"
        );
    }
}

/// The assembled chain.
pub struct MiddlewareChain {
    user: RwLock<Vec<Arc<dyn Middleware>>>,
    logging: Option<LoggingMiddleware>,
    errors: ErrorHandlingMiddleware,
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("user", &self.user.read().len())
            .field("logging", &self.logging.is_some())
            .finish()
    }
}

impl MiddlewareChain {
    /// Error handling plus optional logging.
    pub fn new(mask_error_details: bool, enable_logging: bool) -> Self {
        Self {
            user: RwLock::new(Vec::new()),
            logging: enable_logging.then(LoggingMiddleware::default),
            errors: ErrorHandlingMiddleware::new(mask_error_details),
        }
    }

    /// Append user middleware (outermost layer, run in insertion order on
    /// requests and reverse order on responses).
    pub fn push(&self, middleware: Arc<dyn Middleware>) {
        self.user.write().push(middleware);
    }

    /// Run the request side of the chain.
    pub async fn before(&self, ctx: &MiddlewareContext, params: &Option<Value>) -> Result<()> {
        let user: Vec<_> = self.user.read().clone();
        for mw in &user {
            mw.on_request(ctx, params).await?;
        }
        if let Some(logging) = &self.logging {
            logging.on_request(ctx, params).await?;
        }
        Ok(())
    }

    /// Run the response side of the chain.
    pub async fn after(&self, ctx: &MiddlewareContext, response: &JsonRpcResponse) {
        if let Some(logging) = &self.logging {
            logging.on_response(ctx, response).await;
        }
        let user: Vec<_> = self.user.read().clone();
        for mw in user.iter().rev() {
            mw.on_response(ctx, response).await;
        }
    }

    /// Map a handler error through the innermost error layer.
    pub fn map_error(&self, ctx: &MiddlewareContext, err: &Error) -> JsonRpcResponse {
        self.errors.to_response(ctx, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(method: &str) -> MiddlewareContext {
        MiddlewareContext::new(method, Some(RequestId::Number(9)), Some("s1".into()))
    }

    #[test]
    fn error_mapping_codes() {
        let chain = MiddlewareChain::new(false, false);
        let c = ctx("tools/call");

        let resp = chain.map_error(&c, &Error::not_found("tool 'x' not found"));
        assert_eq!(resp.error_object().unwrap().code, codes::METHOD_NOT_FOUND);
        assert_eq!(resp.error_object().unwrap().message, "tool 'x' not found");
        assert_eq!(resp.id, RequestId::Number(9));

        let resp = chain.map_error(&c, &Error::validation("bad arg"));
        assert_eq!(resp.error_object().unwrap().code, codes::INVALID_PARAMS);

        let resp = chain.map_error(&c, &Error::Tool("exploded".into()));
        assert_eq!(resp.error_object().unwrap().code, codes::INTERNAL_ERROR);
        assert_eq!(resp.error_object().unwrap().message, "exploded");
    }

    #[test]
    fn masking_hides_internal_messages_only() {
        let chain = MiddlewareChain::new(true, false);
        let c = ctx("tools/call");

        let resp = chain.map_error(&c, &Error::internal("secret stack trace"));
        assert_eq!(
            resp.error_object().unwrap().message,
            "Internal server error"
        );

        // Domain errors keep their message even under masking.
        let resp = chain.map_error(&c, &Error::Prompt("missing argument".into()));
        assert_eq!(resp.error_object().unwrap().message, "missing argument");
    }

    struct CountingMiddleware {
        requests: AtomicUsize,
        responses: AtomicUsize,
    }

    #[async_trait]
    impl Middleware for CountingMiddleware {
        async fn on_request(
            &self,
            _ctx: &MiddlewareContext,
            _params: &Option<Value>,
        ) -> Result<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_response(&self, _ctx: &MiddlewareContext, _response: &JsonRpcResponse) {
            self.responses.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn user_middleware_sees_both_sides() {
        let counter = Arc::new(CountingMiddleware {
            requests: AtomicUsize::new(0),
            responses: AtomicUsize::new(0),
        });
        let chain = MiddlewareChain::new(false, true);
        chain.push(counter.clone());

        let c = ctx("ping");
        chain.before(&c, &None).await.unwrap();
        let resp = JsonRpcResponse::success(RequestId::Number(9), serde_json::json!({}));
        chain.after(&c, &resp).await;

        assert_eq!(counter.requests.load(Ordering::SeqCst), 1);
        assert_eq!(counter.responses.load(Ordering::SeqCst), 1);
    }

    struct VetoMiddleware;

    #[async_trait]
    impl Middleware for VetoMiddleware {
        async fn on_request(
            &self,
            _ctx: &MiddlewareContext,
            _params: &Option<Value>,
        ) -> Result<()> {
            Err(Error::Disabled("maintenance window".into()))
        }
    }

    #[tokio::test]
    async fn vetoing_middleware_short_circuits() {
        let chain = MiddlewareChain::new(false, false);
        chain.push(Arc::new(VetoMiddleware));
        let c = ctx("tools/list");
        let err = chain.before(&c, &None).await.unwrap_err();
        assert!(matches!(err, Error::Disabled(_)));
    }
}
