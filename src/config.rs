//! Runtime settings.
//!
//! Defaults first, programmatic overrides second, environment last. The
//! runtime recognizes the `ARCADE_*` variables; tools never read these
//! directly, they see injected secrets and identity through their context.

use std::collections::HashMap;
use std::time::Duration;

/// Environment variable holding the Arcade API key for the authorizer.
pub const ENV_API_KEY: &str = "ARCADE_API_KEY";
/// Environment variable holding the Arcade API base URL.
pub const ENV_API_URL: &str = "ARCADE_API_URL";
/// Environment variable holding the default user id.
pub const ENV_USER_ID: &str = "ARCADE_USER_ID";
/// Environment variable holding the default user email.
pub const ENV_USER_EMAIL: &str = "ARCADE_USER_EMAIL";
/// Environment variable holding the worker bearer secret.
pub const ENV_WORKER_SECRET: &str = "ARCADE_WORKER_SECRET";

const DEFAULT_API_URL: &str = "https://api.arcade.dev";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Server name reported in `initialize`
    pub server_name: String,
    /// Server version reported in `initialize`
    pub server_version: String,
    /// Optional server title
    pub server_title: Option<String>,

    /// Skip runtime authorization entirely
    pub auth_disabled: bool,
    /// Arcade API key for the remote authorizer
    pub api_key: Option<String>,
    /// Arcade API base URL
    pub api_url: String,
    /// Bearer secret required on HTTP endpoints (when auth enabled)
    pub worker_secret: Option<String>,

    /// Default user id when the session does not carry one
    pub user_id: Option<String>,
    /// Default user email, surfaced as tool metadata
    pub user_email: Option<String>,
    /// Local metadata merged into every tool context (never overwrites)
    pub local_metadata: HashMap<String, String>,
    /// Secrets available for injection; process env is the fallback
    pub secrets: HashMap<String, String>,

    /// Notifications per client per minute before drops
    pub rate_limit_per_minute: u32,
    /// Default debounce window in milliseconds
    pub debounce_ms: u64,
    /// Outbound queue capacity per session
    pub outbound_queue_capacity: usize,
    /// Maximum concurrent HTTP sessions
    pub max_sessions: usize,
    /// Inactivity threshold before a session is evicted
    pub session_timeout: Duration,
    /// How often the cleanup loop runs
    pub cleanup_interval: Duration,
    /// Maximum stored events per SSE stream
    pub max_events_per_stream: usize,
    /// Timeout for server-to-client requests
    pub client_request_timeout: Duration,
    /// Replace unexpected error messages with a generic one
    pub mask_error_details: bool,
    /// Emit the request logging middleware
    pub enable_logging_middleware: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            server_name: crate::SERVER_NAME.to_string(),
            server_version: crate::SERVER_VERSION.to_string(),
            server_title: Some(crate::SERVER_NAME.to_string()),
            auth_disabled: false,
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            worker_secret: None,
            user_id: None,
            user_email: None,
            local_metadata: HashMap::new(),
            secrets: HashMap::new(),
            rate_limit_per_minute: 60,
            debounce_ms: 100,
            outbound_queue_capacity: 1000,
            max_sessions: 1000,
            session_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(10),
            max_events_per_stream: 1000,
            client_request_timeout: Duration::from_secs(60),
            mask_error_details: false,
            enable_logging_middleware: true,
        }
    }
}

impl ServerSettings {
    /// Defaults overlaid with the `ARCADE_*` environment.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env();
        settings
    }

    /// Re-read the recognized environment variables into these settings.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.is_empty() {
                self.api_url = url;
            }
        }
        if let Ok(user) = std::env::var(ENV_USER_ID) {
            if !user.is_empty() {
                self.user_id = Some(user);
            }
        }
        if let Ok(email) = std::env::var(ENV_USER_EMAIL) {
            if !email.is_empty() {
                self.user_email = Some(email);
            }
        }
        if let Ok(secret) = std::env::var(ENV_WORKER_SECRET) {
            if !secret.is_empty() {
                self.worker_secret = Some(secret);
            }
        }
    }

    /// Resolve a tool secret: configured secrets first, then process env.
    pub fn lookup_secret(&self, key: &str) -> Option<String> {
        self.secrets
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_runtime_contract() {
        let settings = ServerSettings::default();
        assert_eq!(settings.rate_limit_per_minute, 60);
        assert_eq!(settings.debounce_ms, 100);
        assert_eq!(settings.outbound_queue_capacity, 1000);
        assert_eq!(settings.max_sessions, 1000);
        assert_eq!(settings.session_timeout, Duration::from_secs(300));
        assert_eq!(settings.max_events_per_stream, 1000);
        assert_eq!(settings.client_request_timeout, Duration::from_secs(60));
        assert!(!settings.auth_disabled);
    }

    #[test]
    fn secret_lookup_prefers_configured_value() {
        let mut settings = ServerSettings::default();
        settings
            .secrets
            .insert("SERVICE_TOKEN".to_string(), "from-config".to_string());
        assert_eq!(
            settings.lookup_secret("SERVICE_TOKEN").as_deref(),
            Some("from-config")
        );
        assert!(settings.lookup_secret("DOES_NOT_EXIST_XYZ").is_none());
    }
}
