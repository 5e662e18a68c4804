//! Runtime authorization.
//!
//! Tools may declare an authorization requirement (provider + scopes). At
//! call time the server asks an [`Authorizer`] for a token; a non-completed
//! status yields a result carrying the authorization URL so the client can
//! drive the user through the out-of-band flow.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::catalog::ToolAuthRequirement;
use crate::error::{Error, Result};

/// Where an authorization attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    /// Flow not started
    NotStarted,
    /// Waiting for the user to complete the flow
    Pending,
    /// Token available
    Completed,
    /// Flow failed
    Failed,
}

/// Token and identity attached to a completed authorization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationContext {
    /// Access token for the tool to use
    pub token: Option<String>,
    /// Authorized user id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Provider that issued the token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    /// Flow status
    pub status: AuthorizationStatus,
    /// URL for the user to visit when the flow is not completed
    #[serde(default)]
    pub url: Option<String>,
    /// Token context when completed
    #[serde(default)]
    pub context: Option<AuthorizationContext>,
}

/// Capability for authorizing tool invocations at runtime.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Authorize `user_id` against the tool's requirement.
    async fn authorize(
        &self,
        requirement: &ToolAuthRequirement,
        user_id: &str,
    ) -> Result<AuthorizationResponse>;
}

/// Authorizer backed by the Arcade service.
pub struct RemoteAuthorizer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for RemoteAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAuthorizer")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl RemoteAuthorizer {
    /// Build a client for the given API key and base URL.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Authorizer for RemoteAuthorizer {
    async fn authorize(
        &self,
        requirement: &ToolAuthRequirement,
        user_id: &str,
    ) -> Result<AuthorizationResponse> {
        let body = json!({
            "auth_requirement": {
                "provider_id": requirement.provider_id,
                "provider_type": requirement.provider_type,
                "oauth2": {"scopes": requirement.scopes},
            },
            "user_id": user_id,
        });

        let response = self
            .client
            .post(format!("{}/v1/auth/authorize", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Authorization(format!("authorization request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Authorization(format!(
                "authorization service returned {}",
                response.status()
            )));
        }

        response
            .json::<AuthorizationResponse>()
            .await
            .map_err(|e| Error::Authorization(format!("malformed authorization response: {e}")))
    }
}

/// Locally configured auth provider for the mock authorizer.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    /// Granted scopes reported back on completion
    pub scopes: Vec<String>,
    /// Tokens keyed by user id
    pub mock_tokens: HashMap<String, String>,
}

/// Development authorizer that answers from local configuration.
///
/// Token resolution order: configured `mock_tokens` for the user, then the
/// `ARCADE_<PROVIDER_ID>_TOKEN` environment variable. With no token the
/// response is `pending` with a local URL, mirroring the out-of-band flow.
#[derive(Debug, Default)]
pub struct MockAuthorizer {
    providers: HashMap<String, MockProvider>,
    base_url: String,
}

impl MockAuthorizer {
    /// Empty mock pointing at a local URL.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            base_url: "http://localhost:8002".to_string(),
        }
    }

    /// Register a provider configuration.
    pub fn with_provider(mut self, provider_id: impl Into<String>, provider: MockProvider) -> Self {
        self.providers.insert(provider_id.into(), provider);
        self
    }

    fn env_token(provider_id: &str) -> Option<String> {
        let key = format!(
            "ARCADE_{}_TOKEN",
            provider_id.to_ascii_uppercase().replace('-', "_")
        );
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl Authorizer for MockAuthorizer {
    async fn authorize(
        &self,
        requirement: &ToolAuthRequirement,
        user_id: &str,
    ) -> Result<AuthorizationResponse> {
        let provider_id = &requirement.provider_id;
        let provider = self.providers.get(provider_id);

        let token = provider
            .and_then(|p| p.mock_tokens.get(user_id).cloned())
            .or_else(|| Self::env_token(provider_id));

        match token {
            Some(token) => Ok(AuthorizationResponse {
                status: AuthorizationStatus::Completed,
                url: None,
                context: Some(AuthorizationContext {
                    token: Some(token),
                    user_id: Some(user_id.to_string()),
                    provider_id: Some(provider_id.clone()),
                    scopes: provider.map(|p| p.scopes.clone()).unwrap_or_default(),
                }),
            }),
            None => {
                tracing::warn!(
                    target: "mcp.auth",
                    provider = %provider_id,
                    user = %user_id,
                    "no mock token configured; returning pending authorization"
                );
                Ok(AuthorizationResponse {
                    status: AuthorizationStatus::Pending,
                    url: Some(format!(
                        "{}/mock-auth/{provider_id}/{user_id}",
                        self.base_url
                    )),
                    context: None,
                })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement() -> ToolAuthRequirement {
        ToolAuthRequirement {
            provider_id: "google".into(),
            provider_type: "oauth2".into(),
            scopes: vec!["email".into()],
        }
    }

    #[tokio::test]
    async fn mock_returns_configured_token() {
        let mut tokens = HashMap::new();
        tokens.insert("alice".to_string(), "tok-alice".to_string());
        let authorizer = MockAuthorizer::new().with_provider(
            "google",
            MockProvider {
                scopes: vec!["email".into()],
                mock_tokens: tokens,
            },
        );

        let response = authorizer.authorize(&requirement(), "alice").await.unwrap();
        assert_eq!(response.status, AuthorizationStatus::Completed);
        let ctx = response.context.unwrap();
        assert_eq!(ctx.token.as_deref(), Some("tok-alice"));
        assert_eq!(ctx.scopes, vec!["email".to_string()]);
    }

    #[tokio::test]
    async fn mock_returns_pending_url_without_token() {
        let authorizer = MockAuthorizer::new();
        let response = authorizer.authorize(&requirement(), "bob").await.unwrap();
        assert_eq!(response.status, AuthorizationStatus::Pending);
        assert!(response.url.unwrap().contains("/mock-auth/google/bob"));
        assert!(response.context.is_none());
    }

    #[test]
    fn authorization_response_deserializes_service_shape() {
        let raw = serde_json::json!({
            "status": "completed",
            "url": "",
            "context": {"token": "tok", "scopes": []}
        });
        let response: AuthorizationResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.status, AuthorizationStatus::Completed);
        assert_eq!(response.context.unwrap().token.as_deref(), Some("tok"));
    }
}
