//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [websession]   # gateway settings
//! [cache]        # descriptor of the in-memory session cache
//! [server]       # HTTP listener and in-process session container
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use websession::{
    AtomicityMode, CacheDescriptor, CacheMode, GatewayConfig, MemoryStoreConfig, WriteSyncMode,
};

use crate::{ConfigError, Result};

/// Default listen address for the demo node.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Default session cookie, as set by servlet containers.
pub const DEFAULT_COOKIE_NAME: &str = "JSESSIONID";

/// Default inactivity timeout for new sessions.
pub const DEFAULT_MAX_INACTIVE_SECS: i64 = 1800;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// Every section is optional so that a partial file (such as a
/// deployment-local override) can be loaded and merged over another.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSessionConfig {
    /// Gateway settings.
    pub websession: Option<GatewaySection>,

    /// Cache descriptor for the in-memory store.
    pub cache: Option<CacheSection>,

    /// HTTP server settings.
    pub server: Option<ServerSection>,
}

impl WebSessionConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: WebSessionConfig) {
        if other.websession.is_some() {
            self.websession = other.websession;
        }

        if other.cache.is_some() {
            self.cache = other.cache;
        }

        if other.server.is_some() {
            self.server = other.server;
        }
    }

    /// Gateway configuration, with the retry budget validated.
    pub fn gateway_config(&self) -> Result<GatewayConfig> {
        let section = self.websession.clone().unwrap_or_default();
        let mut config = GatewayConfig::new().with_max_retries(section.max_retries()?);
        config.cache_name = section.cache_name;
        Ok(config)
    }

    /// Descriptor for the session cache; named after `[websession] cache_name`.
    pub fn cache_descriptor(&self) -> CacheDescriptor {
        let cache = self.cache.clone().unwrap_or_default();
        CacheDescriptor {
            name: self
                .websession
                .as_ref()
                .and_then(|section| section.cache_name.clone()),
            atomicity: cache.atomicity,
            write_sync: cache.write_sync,
            eager_ttl: cache.eager_ttl,
            mode: cache.mode,
        }
    }

    /// In-memory store settings.
    pub fn store_config(&self) -> Result<MemoryStoreConfig> {
        let cache = self.cache.clone().unwrap_or_default();
        if cache.expiry_sweep_secs == 0 {
            return Err(ConfigError::invalid(
                "cache.expiry_sweep_secs",
                "must be at least 1",
            ));
        }
        if cache.max_entries == 0 {
            return Err(ConfigError::invalid("cache.max_entries", "must be at least 1"));
        }
        Ok(MemoryStoreConfig::new()
            .with_max_entries(cache.max_entries)
            .with_sweep_interval(Duration::from_secs(cache.expiry_sweep_secs)))
    }

    /// Server section, defaulted when absent.
    pub fn server(&self) -> ServerSection {
        self.server.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `[websession]`: gateway settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Cache holding session records; absent means the default cache.
    pub cache_name: Option<String>,

    /// Retries after a failed ATOMIC write-back.
    ///
    /// Kept as a raw value so that a negative or non-integer setting is
    /// reported with the value the operator wrote.
    pub max_retries: Option<toml::Value>,
}

impl GatewaySection {
    /// Validated retry budget; the engine default when unset.
    pub fn max_retries(&self) -> Result<u32> {
        let raw = self.max_retries.as_ref().map(|value| match value {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        GatewayConfig::parse_max_retries(raw.as_deref())
            .map_err(|e| ConfigError::invalid("websession.max_retries", e))
    }
}

/// `[cache]`: how the session cache is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub atomicity: AtomicityMode,
    pub write_sync: WriteSyncMode,
    pub eager_ttl: bool,
    pub mode: CacheMode,

    /// Interval of the eager expiry reaper, in seconds.
    pub expiry_sweep_secs: u64,

    /// Entries kept before the least recently used is evicted.
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            atomicity: AtomicityMode::default(),
            write_sync: WriteSyncMode::default(),
            eager_ttl: true,
            mode: CacheMode::default(),
            expiry_sweep_secs: 1,
            max_entries: websession::DEFAULT_MAX_ENTRIES,
        }
    }
}

/// `[server]`: listener and in-process container settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,

    /// Cookie carrying the session id.
    pub cookie_name: String,

    /// Inactivity timeout given to new sessions, in seconds.
    pub default_max_inactive_secs: i64,

    /// Append a `!tag!timestamp` routing suffix to generated ids.
    pub id_suffix: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            default_max_inactive_secs: DEFAULT_MAX_INACTIVE_SECS,
            id_suffix: false,
        }
    }
}

impl ServerSection {
    /// Parsed listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| ConfigError::invalid("server.bind", format!("{}: {e}", self.bind)))
    }
}
