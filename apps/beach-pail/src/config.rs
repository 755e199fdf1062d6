use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid worker endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("worker endpoint must use ws:// or wss://, got '{scheme}://'")]
    UnsupportedScheme { scheme: String },
    #[error("{name} must be greater than zero")]
    ZeroTimeout { name: &'static str },
}

/// Where the packaging worker lives and how long a session may wait on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: Url,
    /// Bound on establishing the websocket.
    pub connect_timeout: Duration,
    /// Bound on the first worker frame after the request went out.
    pub response_timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                name: "connect timeout",
            });
        }
        if self.response_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                name: "response timeout",
            });
        }
        Ok(())
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidEndpoint {
        endpoint: raw.to_owned(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(ConfigError::UnsupportedScheme {
                scheme: other.to_owned(),
            });
        }
    }
    // Normalize localhost to IPv4 to avoid IPv6 (::1) preference on macOS
    if url.host_str() == Some("localhost") {
        url.set_host(Some("127.0.0.1"))
            .map_err(|err| ConfigError::InvalidEndpoint {
                endpoint: raw.to_owned(),
                reason: err.to_string(),
            })?;
    }
    Ok(url)
}
