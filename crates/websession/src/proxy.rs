//! Request-scoped session wrapper that records attribute mutations.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::record::{AttributeDiff, AttributeUpdate, SessionRecord};

/// Wraps a [`SessionRecord`] for one request and accumulates the attribute
/// diff since the last [`reset_updates`](SessionProxy::reset_updates).
///
/// Reads go to the wrapped attribute map and never touch the diff.
#[derive(Debug, Clone)]
pub struct SessionProxy {
    record: SessionRecord,
    updates: AttributeDiff,
    timeout_changed: bool,
}

impl SessionProxy {
    /// Wrap a record with an empty diff.
    pub fn new(record: SessionRecord) -> Self {
        Self {
            record,
            updates: Vec::new(),
            timeout_changed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn is_new(&self) -> bool {
        self.record.is_new
    }

    pub fn max_inactive_secs(&self) -> i64 {
        self.record.max_inactive_secs
    }

    /// Change the inactivity timeout; the next write-back reapplies expiry.
    pub fn set_max_inactive_secs(&mut self, secs: i64) {
        if secs != self.record.max_inactive_secs {
            self.record.max_inactive_secs = secs;
            self.timeout_changed = true;
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.record.attributes.get(name)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.record.attributes.keys().cloned().collect()
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.record.attributes.insert(name.clone(), value.clone());
        self.updates.push(AttributeUpdate::set(name, value));
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.record.attributes.remove(name);
        self.updates.push(AttributeUpdate::remove(name));
    }

    /// Clear the diff, keeping the current attribute view.
    pub fn reset_updates(&mut self) {
        self.updates.clear();
        self.timeout_changed = false;
    }

    /// Changes recorded since the last reset.
    pub fn updates(&self) -> &[AttributeUpdate] {
        &self.updates
    }

    /// Whether anything needs to be written back.
    pub fn has_updates(&self) -> bool {
        !self.updates.is_empty() || self.timeout_changed
    }

    /// The proxy's current view of the record.
    pub fn record(&self) -> &SessionRecord {
        &self.record
    }
}

/// Session handle given to downstream handlers.
///
/// Cloning shares the same underlying proxy, so the gateway observes every
/// mutation a handler makes through any clone.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionProxy>>,
}

impl Session {
    pub(crate) fn bind(proxy: SessionProxy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(proxy)),
        }
    }

    pub fn id(&self) -> String {
        self.inner.lock().id().to_string()
    }

    pub fn is_new(&self) -> bool {
        self.inner.lock().is_new()
    }

    pub fn max_inactive_secs(&self) -> i64 {
        self.inner.lock().max_inactive_secs()
    }

    pub fn set_max_inactive_secs(&self, secs: i64) {
        self.inner.lock().set_max_inactive_secs(secs);
    }

    /// Read an attribute and deserialize it.
    ///
    /// Returns `None` when the attribute is absent or has a different shape.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = self.get_raw(name)?;
        serde_json::from_value(value).ok()
    }

    pub fn get_raw(&self, name: &str) -> Option<Value> {
        self.inner.lock().attribute(name).cloned()
    }

    /// Serialize and store an attribute.
    ///
    /// A value that fails to serialize is rejected here and never reaches
    /// the diff.
    pub fn set<T: Serialize>(&self, name: impl Into<String>, value: T) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.inner.lock().set_attribute(name, value);
        Ok(())
    }

    pub fn remove(&self, name: &str) {
        self.inner.lock().remove_attribute(name);
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.inner.lock().attribute_names()
    }

    /// Take the diff and final timeout once the handler is done.
    pub(crate) fn drain(&self) -> Option<(AttributeDiff, i64)> {
        let mut proxy = self.inner.lock();
        if !proxy.has_updates() {
            return None;
        }
        let diff = std::mem::take(&mut proxy.updates);
        proxy.timeout_changed = false;
        Some((diff, proxy.max_inactive_secs()))
    }
}
