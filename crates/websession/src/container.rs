//! Interface to the hosting container's in-process sessions.

use chrono::{DateTime, Utc};

use crate::error::ContainerError;

/// A live in-process session owned by the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSession {
    /// Id as issued by the container, possibly with a routing suffix.
    pub raw_id: String,
    pub created_at: DateTime<Utc>,
    pub max_inactive_secs: i64,
}

/// The container that creates, looks up and invalidates in-process sessions.
///
/// The gateway only uses the container to obtain fresh ids and creation
/// metadata; attribute state always lives in the cache.
pub trait SessionContainer: Send + Sync {
    /// Look up the session under `raw_id`.
    ///
    /// With `create`, a missing session is created, under a fresh id from
    /// [`generate_id`](SessionContainer::generate_id) when `raw_id` is `None`.
    fn get_session(&self, raw_id: Option<&str>, create: bool) -> Option<ContainerSession>;

    /// Issue a new raw session id.
    fn generate_id(&self) -> String;

    /// Invalidate the session under `raw_id`.
    fn invalidate(&self, raw_id: &str) -> Result<(), ContainerError>;
}
