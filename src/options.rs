//! Client configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::client::ClientError;

/// Environment variable holding the API base URL.
pub const BASE_URL_ENV: &str = "CLINCHAT_BASE_URL";

/// Environment variable holding the request timeout in seconds.
pub const TIMEOUT_ENV: &str = "CLINCHAT_TIMEOUT_SECS";

const DEFAULT_STREAM_PATH: &str = "/chat/stream";
const DEFAULT_MESSAGE_PATH: &str = "/chat";

/// A secret string type for bearer tokens.
/// Prevents accidental logging or display of secrets.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Where and how to reach the chat API.
///
/// # Example
/// ```rust
/// use clinchat::options::ClientOptions;
/// use std::time::Duration;
///
/// let options = ClientOptions::new("https://api.example.com/")
///     .with_timeout(Duration::from_secs(120))
///     .with_header("X-Client".to_string(), "clinchat".to_string());
///
/// assert_eq!(options.stream_url(), "https://api.example.com/chat/stream");
/// assert_eq!(options.message_url(), "https://api.example.com/chat");
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base URL for API endpoints
    pub base_url: String,

    /// Whole-request timeout. The decoder itself never times out.
    pub timeout: Option<Duration>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,

    /// Path of the streaming endpoint
    pub stream_path: String,

    /// Path of the send-and-wait endpoint
    pub message_path: String,
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
            proxy: None,
            extra_headers: None,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            message_path: DEFAULT_MESSAGE_PATH.to_string(),
        }
    }

    /// Read options from `CLINCHAT_BASE_URL` and `CLINCHAT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = std::env::var(BASE_URL_ENV)
            .map_err(|_| ClientError::Config(format!("{} must be set", BASE_URL_ENV)))?;
        let timeout = match std::env::var(TIMEOUT_ENV) {
            Ok(value) => Some(parse_timeout(&value)?),
            Err(_) => None,
        };

        let mut options = Self::new(base_url);
        options.timeout = timeout;
        Ok(options)
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set extra headers.
    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = Some(headers);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }

    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    pub fn with_message_path(mut self, path: impl Into<String>) -> Self {
        self.message_path = path.into();
        self
    }

    /// Full URL of the streaming endpoint.
    pub fn stream_url(&self) -> String {
        self.join(&self.stream_path)
    }

    /// Full URL of the send-and-wait endpoint.
    pub fn message_url(&self) -> String {
        self.join(&self.message_path)
    }

    fn join(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn parse_timeout(value: &str) -> Result<Duration, ClientError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ClientError::Config(format!("{} must be a whole number of seconds", TIMEOUT_ENV)))
}
