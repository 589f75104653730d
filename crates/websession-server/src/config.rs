//! Server configuration.

use std::net::SocketAddr;

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "JSESSIONID";

/// Default inactivity timeout for new sessions (30 minutes).
pub const DEFAULT_MAX_INACTIVE_SECS: i64 = 1800;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Cookie carrying the session id.
    pub cookie_name: String,

    /// Inactivity timeout given to sessions this node creates.
    pub default_max_inactive_secs: i64,

    /// Append a `!tag!timestamp` routing suffix to generated session ids.
    pub id_suffix: bool,

    /// Enable HTTP request tracing.
    pub request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            default_max_inactive_secs: DEFAULT_MAX_INACTIVE_SECS,
            id_suffix: false,
            request_logging: true,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn with_default_max_inactive_secs(mut self, secs: i64) -> Self {
        self.default_max_inactive_secs = secs;
        self
    }

    pub fn with_id_suffix(mut self, enabled: bool) -> Self {
        self.id_suffix = enabled;
        self
    }

    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }
}
