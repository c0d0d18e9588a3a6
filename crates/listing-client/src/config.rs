use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{ListingError, ListingResult};

pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:9090";
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const RESEND_DELAY: Duration = Duration::from_millis(1000);

const OBJECT_MANAGER_PATH: &str = "ws/objectManager";

/// Where and how the listing engine reaches the console.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Origin the console UI is served from (scheme, host, port).
    pub origin: Url,
    /// Base path the console is mounted under; `/` unless behind a proxy.
    pub base_path: String,
    /// Session JWT, sent as the `token` cookie on the upgrade request.
    pub session_token: Option<String>,
    /// Browse without a session (`X-Anonymous: 1`).
    pub anonymous: bool,
    pub reconnect_delay: Duration,
    pub resend_delay: Duration,
}

impl ClientConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            base_path: "/".to_string(),
            session_token: None,
            anonymous: false,
            reconnect_delay: RECONNECT_DELAY,
            resend_delay: RESEND_DELAY,
        }
    }

    /// Load configuration from `LISTING_*` environment variables.
    pub fn from_env() -> ListingResult<Self> {
        let origin =
            env::var("LISTING_CONSOLE_ORIGIN").unwrap_or_else(|_| DEFAULT_ORIGIN.to_string());
        let mut config = Self::new(Url::parse(&normalize_localhost(&origin))?);
        if let Ok(base_path) = env::var("LISTING_BASE_PATH") {
            config.base_path = base_path;
        }
        config.session_token = env::var("LISTING_SESSION_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());
        config.anonymous = env::var("LISTING_ANONYMOUS")
            .map(|v| v != "0" && !v.is_empty())
            .unwrap_or(false);
        Ok(config)
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Websocket endpoint derived from the console origin and base path.
    pub fn endpoint(&self) -> ListingResult<Url> {
        let scheme = match self.origin.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ListingError::UnsupportedScheme(other.to_string())),
        };
        let host = self
            .origin
            .host_str()
            .ok_or_else(|| ListingError::UnsupportedScheme(self.origin.to_string()))?;
        let port = self
            .origin
            .port()
            .map(|port| format!(":{port}"))
            .unwrap_or_default();

        let mut base = self.base_path.trim().to_string();
        if !base.starts_with('/') {
            base.insert(0, '/');
        }
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Url::parse(&format!(
            "{scheme}://{host}{port}{base}{OBJECT_MANAGER_PATH}"
        ))?)
    }
}

// Avoid IPv6 (::1) preference when resolving localhost.
fn normalize_localhost(origin: &str) -> String {
    origin.replacen("://localhost", "://127.0.0.1", 1)
}
