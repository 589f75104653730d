//! The session record stored under each cache key, and the attribute diff
//! applied to it.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One change to a session attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum AttributeChange {
    /// The attribute was set to this value.
    Set(Value),
    /// The attribute was removed.
    Remove,
}

/// A named attribute change, in the order it was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    pub name: String,
    pub change: AttributeChange,
}

impl AttributeUpdate {
    pub fn set(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            change: AttributeChange::Set(value),
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            change: AttributeChange::Remove,
        }
    }
}

/// Ordered attribute changes accumulated during one request.
pub type AttributeDiff = Vec<AttributeUpdate>;

/// Snapshot of a session as stored in the cache.
///
/// Records read from the cache are never modified in place and written back;
/// callers derive a new value first (see [`SessionRecord::not_new`] and
/// [`SessionRecord::with_updates`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Canonical session id, also the cache key.
    pub id: String,

    /// Attribute values by name.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,

    /// When the session was created.
    pub created_at: DateTime<Utc>,

    /// When the session was last written back.
    pub last_accessed_at: DateTime<Utc>,

    /// Inactivity timeout in seconds; `<= 0` never expires.
    pub max_inactive_secs: i64,

    /// True until the first node observes the created record.
    pub is_new: bool,
}

impl SessionRecord {
    /// Create a fresh record flagged as new.
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, max_inactive_secs: i64) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
            created_at,
            last_accessed_at: created_at,
            max_inactive_secs,
            is_new: true,
        }
    }

    /// Copy of this record with the new-session flag cleared.
    pub fn not_new(&self) -> Self {
        Self {
            is_new: false,
            ..self.clone()
        }
    }

    /// Copy of this record with `diff` applied on top of its attributes.
    ///
    /// Sets overwrite, removes drop the key, later entries win. The access
    /// time and inactivity timeout are replaced, and a written-back record is
    /// never new.
    pub fn with_updates(
        &self,
        diff: &[AttributeUpdate],
        max_inactive_secs: i64,
        accessed_at: DateTime<Utc>,
    ) -> Self {
        let mut next = self.clone();
        for update in diff {
            match &update.change {
                AttributeChange::Set(value) => {
                    next.attributes.insert(update.name.clone(), value.clone());
                }
                AttributeChange::Remove => {
                    next.attributes.remove(&update.name);
                }
            }
        }
        next.last_accessed_at = accessed_at;
        next.max_inactive_secs = max_inactive_secs;
        next.is_new = false;
        next
    }

    /// Cache expiry for a write of this record.
    pub fn expiry(&self) -> Option<Duration> {
        expiry_for(self.max_inactive_secs)
    }
}

/// Expiry override for an inactivity timeout; `None` when it never expires.
pub fn expiry_for(max_inactive_secs: i64) -> Option<Duration> {
    u64::try_from(max_inactive_secs)
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_with(attrs: &[(&str, Value)]) -> SessionRecord {
        let mut record = SessionRecord::new("s-1", Utc::now(), 60);
        for (name, value) in attrs {
            record.attributes.insert(name.to_string(), value.clone());
        }
        record
    }

    #[test]
    fn test_apply_set_and_remove() {
        let record = record_with(&[("a", json!(0)), ("b", json!(2)), ("c", json!(3))]);
        let diff = vec![AttributeUpdate::set("a", json!(1)), AttributeUpdate::remove("b")];

        let updated = record.with_updates(&diff, 60, Utc::now());

        let expected: BTreeMap<String, Value> =
            [("a".to_string(), json!(1)), ("c".to_string(), json!(3))].into();
        assert_eq!(updated.attributes, expected);
        // Source record untouched
        assert_eq!(record.attributes.len(), 3);
    }

    #[test]
    fn test_later_update_wins() {
        let record = record_with(&[]);
        let diff = vec![
            AttributeUpdate::set("x", json!("first")),
            AttributeUpdate::remove("x"),
            AttributeUpdate::set("x", json!("last")),
        ];

        let updated = record.with_updates(&diff, 60, Utc::now());
        assert_eq!(updated.attributes.get("x"), Some(&json!("last")));
    }

    #[test]
    fn test_updates_timeout_and_access_time() {
        let record = record_with(&[]);
        let later = record.created_at + chrono::Duration::seconds(5);

        let updated = record.with_updates(&[], 120, later);
        assert_eq!(updated.max_inactive_secs, 120);
        assert_eq!(updated.last_accessed_at, later);
        assert_eq!(updated.created_at, record.created_at);
        assert!(!updated.is_new);
    }

    #[test]
    fn test_not_new_derives_copy() {
        let record = record_with(&[("a", json!(1))]);
        assert!(record.is_new);

        let seen = record.not_new();
        assert!(!seen.is_new);
        assert!(record.is_new);
        assert_eq!(seen.attributes, record.attributes);
        assert_eq!(seen.id, record.id);
    }

    #[test]
    fn test_expiry() {
        assert_eq!(expiry_for(30), Some(Duration::from_secs(30)));
        assert_eq!(expiry_for(0), None);
        assert_eq!(expiry_for(-1), None);
    }

    #[test]
    fn test_json_roundtrip_keeps_id_and_attributes() {
        let record = record_with(&[("cart", json!({"items": [1, 2]})), ("n", json!(7))]);
        let bytes = serde_json::to_vec(&record).unwrap();
        let decoded: SessionRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.id, record.id);
        assert_eq!(decoded.attributes, record.attributes);
    }
}
