//! Error types for the session replication engine.

/// Error reported by a [`SessionStore`](crate::SessionStore) or one of its transactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Some cluster members did not apply the update.
    #[error("Partial update: {0}")]
    PartialUpdate(String),

    /// A cluster member left the topology mid-operation.
    #[error("Node left topology: {0}")]
    NodeLeft(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The cache is not reachable or not started.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// The cache was not configured with transactional atomicity.
    #[error("Cache does not support transactions")]
    TransactionsUnsupported,

    /// A transaction could not be started, committed or rolled back.
    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl StoreError {
    /// Whether repeating the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::PartialUpdate(_) | StoreError::NodeLeft(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for cache client operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Invalid engine configuration, fatal at startup.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Writes would be acknowledged before any node applied them.
    #[error("Cache for web sessions cannot be in FULL_ASYNC mode: {0}")]
    FullAsyncWrites(String),

    /// Expired entries would only be dropped on the next access.
    #[error(
        "Cache for web sessions cannot operate with lazy TTL, consider enabling eager TTL for cache: {0}"
    )]
    LazyExpiry(String),

    /// The injected cache is not the one the gateway was configured for.
    #[error("Cache for web sessions is not started (is it configured?): {expected}, found {found}")]
    CacheNameMismatch { expected: String, found: String },

    /// Retry budget is not a non-negative integer.
    #[error("Maximum number of retries parameter is invalid: {0}")]
    InvalidMaxRetries(String),
}

/// Failure to write an attribute diff back to the cache.
///
/// The gateway logs these and never returns them to the request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PropagationError {
    /// Every attempt hit a transient failure or a concurrent write.
    #[error("Failed to update session {id} after {attempts} attempts: {last}")]
    RetriesExhausted {
        id: String,
        attempts: u32,
        last: String,
    },

    /// The cache reported a failure that retrying cannot fix.
    #[error("Failed to update session {id}: {source}")]
    Store {
        id: String,
        #[source]
        source: StoreError,
    },
}

/// Failure raised by the session container.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContainerError {
    /// The in-process session was already invalidated by another worker.
    #[error("Session already invalidated: {0}")]
    AlreadyInvalidated(String),
}

/// Error returned by [`SessionGateway`](crate::SessionGateway).
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The gateway was constructed over an unusable cache.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No session record could be loaded or created for the request.
    #[error("Failed to bind session {id}: {source}")]
    Bind {
        id: String,
        #[source]
        source: StoreError,
    },

    /// The container refused to create an in-process session.
    #[error("Container did not create a session")]
    NoContainerSession,

    /// The request-scoped transaction could not be opened.
    #[error("Transaction error: {0}")]
    Transaction(StoreError),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
