//! In-process session container.
//!
//! Tracks the sessions this node has handed out. Ids are random UUIDs,
//! optionally carrying a `!tag!timestamp` routing suffix the way some
//! hosting containers append one; the engine strips it before the id is
//! used as a cache key.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;
use websession::{ContainerError, ContainerSession, SessionContainer};

/// Session container backed by a map in this process.
#[derive(Debug)]
pub struct LocalContainer {
    sessions: Mutex<HashMap<String, ContainerSession>>,
    default_max_inactive_secs: i64,
    /// Routing tag for suffixed ids; `None` generates plain ids.
    tag: Option<i16>,
}

impl LocalContainer {
    pub fn new(default_max_inactive_secs: i64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_max_inactive_secs,
            tag: None,
        }
    }

    /// Generate ids carrying a per-container routing suffix.
    pub fn with_id_suffix(mut self) -> Self {
        self.tag = Some(Uuid::new_v4().as_u128() as i16);
        self
    }

    /// Number of in-process sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Whether an in-process session exists under `raw_id`.
    pub fn contains(&self, raw_id: &str) -> bool {
        self.sessions.lock().contains_key(raw_id)
    }

    pub fn default_max_inactive_secs(&self) -> i64 {
        self.default_max_inactive_secs
    }
}

impl SessionContainer for LocalContainer {
    fn get_session(&self, raw_id: Option<&str>, create: bool) -> Option<ContainerSession> {
        let mut sessions = self.sessions.lock();

        if let Some(found) = raw_id.and_then(|id| sessions.get(id)) {
            return Some(found.clone());
        }
        if !create {
            return None;
        }

        let raw_id = raw_id
            .map(str::to_string)
            .unwrap_or_else(|| self.generate_id());
        let session = ContainerSession {
            raw_id: raw_id.clone(),
            created_at: Utc::now(),
            max_inactive_secs: self.default_max_inactive_secs,
        };
        debug!(session_id = %raw_id, "Created in-process session");
        sessions.insert(raw_id, session.clone());
        Some(session)
    }

    fn generate_id(&self) -> String {
        let id = Uuid::new_v4().simple().to_string();
        match self.tag {
            Some(tag) => format!("{id}!{tag}!{}", Utc::now().timestamp_millis()),
            None => id,
        }
    }

    fn invalidate(&self, raw_id: &str) -> Result<(), ContainerError> {
        self.sessions
            .lock()
            .remove(raw_id)
            .map(|_| ())
            .ok_or_else(|| ContainerError::AlreadyInvalidated(raw_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use websession::normalize_session_id;

    #[test]
    fn test_creates_with_generated_id() {
        let container = LocalContainer::new(600);

        let session = container.get_session(None, true).unwrap();
        assert_eq!(session.raw_id.len(), 32);
        assert_eq!(session.max_inactive_secs, 600);
        assert!(container.contains(&session.raw_id));
    }

    #[test]
    fn test_lookup_without_create() {
        let container = LocalContainer::new(600);
        assert!(container.get_session(Some("unknown"), false).is_none());
        assert!(container.get_session(None, false).is_none());
        assert!(container.is_empty());
    }

    #[test]
    fn test_reuses_requested_id() {
        let container = LocalContainer::new(600);

        let created = container.get_session(Some("abc"), true).unwrap();
        assert_eq!(created.raw_id, "abc");

        let again = container.get_session(Some("abc"), true).unwrap();
        assert_eq!(again.created_at, created.created_at);
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_suffixed_ids_normalize_to_uuid() {
        let container = LocalContainer::new(600).with_id_suffix();

        let raw = container.generate_id();
        assert_eq!(raw.matches('!').count(), 2);
        assert_eq!(normalize_session_id(&raw).len(), 32);
    }

    #[test]
    fn test_invalidate_twice() {
        let container = LocalContainer::new(600);
        container.get_session(Some("abc"), true);

        assert!(container.invalidate("abc").is_ok());
        assert!(matches!(
            container.invalidate("abc"),
            Err(ContainerError::AlreadyInvalidated(id)) if id == "abc"
        ));
    }
}
