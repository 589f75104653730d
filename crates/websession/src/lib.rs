//! Replicated web sessions over a cluster-wide key/value cache.
//!
//! This crate keeps a session's attributes durable across server processes
//! that share one cache:
//! - Binds each request to the cached session record, creating it if needed
//! - Tracks attribute changes made while the request is handled
//! - Writes only those changes back, retrying transient cache failures
//! - Resolves two nodes creating the same session at once
//!
//! # Example
//!
//! ```rust,ignore
//! use websession::{GatewayConfig, MemoryStore, SessionGateway, AtomicityMode};
//!
//! let store = Arc::new(MemoryStore::with_atomicity(AtomicityMode::Atomic));
//! let gateway = SessionGateway::new(store, container, GatewayConfig::default())?;
//!
//! let greeting = gateway
//!     .handle(requested_id, |session| async move {
//!         let visits = session.get::<u32>("visits").unwrap_or(0) + 1;
//!         session.set("visits", visits)?;
//!         Ok::<_, AppError>(format!("visit {visits}"))
//!     })
//!     .await?;
//! ```

mod config;
mod container;
mod error;
mod gateway;
mod id;
mod memory;
mod propagator;
mod proxy;
mod record;
mod store;

pub use config::{
    DEFAULT_MAX_ENTRIES, DEFAULT_MAX_RETRIES, DEFAULT_SWEEP_INTERVAL, GatewayConfig,
    MemoryStoreConfig,
};
pub use container::{ContainerSession, SessionContainer};
pub use error::{
    ConfigError, ContainerError, GatewayError, PropagationError, Result, StoreError, StoreResult,
};
pub use gateway::{ConsistencyMode, SessionGateway, validate_descriptor};
pub use id::normalize as normalize_session_id;
pub use memory::{MemoryStore, StoreStats};
pub use propagator::{Applied, UpdatePropagator};
pub use proxy::{Session, SessionProxy};
pub use record::{AttributeChange, AttributeDiff, AttributeUpdate, SessionRecord, expiry_for};
pub use store::{
    AtomicityMode, CacheDescriptor, CacheMode, SessionStore, StoreTransaction, WriteSyncMode,
};
