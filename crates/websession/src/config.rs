//! Configuration for the gateway and the in-memory store.

use std::time::Duration;

use crate::error::ConfigError;

/// Default number of retries for ATOMIC write-back.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default capacity of the in-memory store.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default interval of the in-memory store's expiry reaper.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Gateway configuration.
///
/// The consistency mode is not configured here: it follows the atomicity of
/// the cache the gateway is built over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Name of the cache holding session records; `None` is the default cache.
    pub cache_name: Option<String>,

    /// Retries after a failed ATOMIC write-back. Zero disables retrying, so a
    /// single transient failure may silently drop that request's update.
    pub max_retries: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cache_name: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = Some(name.into());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Parse a retry budget given as text, falling back to the default when absent.
    pub fn parse_max_retries(raw: Option<&str>) -> Result<u32, ConfigError> {
        match raw.map(str::trim) {
            None => Ok(DEFAULT_MAX_RETRIES),
            Some(s) => s
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidMaxRetries(s.to_string())),
        }
    }
}

/// Configuration for [`MemoryStore`](crate::MemoryStore).
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Entries kept before the least recently used one is evicted.
    pub max_entries: usize,

    /// How often the expiry reaper runs, if spawned.
    pub sweep_interval: Duration,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl MemoryStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
