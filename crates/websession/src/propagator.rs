//! Writes attribute diffs back to the cache.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, trace};

use crate::error::PropagationError;
use crate::record::{AttributeUpdate, expiry_for};
use crate::store::{SessionStore, StoreTransaction};

/// Outcome of a successful write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The diff is now part of the stored record.
    Written {
        /// Attempts used, including the first.
        attempts: u32,
    },
    /// No record exists for the id any more; the diff was dropped.
    Missing,
}

/// Applies attribute diffs to the cache.
///
/// In ATOMIC mode every attempt re-reads the record, merges the diff and
/// writes it back with a compare-and-swap. A transient failure or a
/// concurrent write consumes one retry; once `max_retries` retries are spent
/// the update is reported as failed.
#[derive(Clone)]
pub struct UpdatePropagator {
    store: Arc<dyn SessionStore>,
    max_retries: u32,
}

impl UpdatePropagator {
    pub fn new(store: Arc<dyn SessionStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Merge `diff` into the stored record for `id`, retrying on transient
    /// failure.
    pub async fn apply(
        &self,
        id: &str,
        diff: &[AttributeUpdate],
        max_inactive_secs: i64,
    ) -> Result<Applied, PropagationError> {
        let attempts = self.max_retries.saturating_add(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            let current = match self.store.get(id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(session_id = %id, "Session no longer cached, dropping update");
                    return Ok(Applied::Missing);
                }
                Err(e) if e.is_transient() => {
                    debug!(session_id = %id, attempt, error = %e, "Transient failure reading session");
                    last = e.to_string();
                    continue;
                }
                Err(e) => {
                    return Err(PropagationError::Store {
                        id: id.to_string(),
                        source: e,
                    });
                }
            };

            let updated = current.with_updates(diff, max_inactive_secs, Utc::now());

            match self
                .store
                .replace(&current, &updated, expiry_for(max_inactive_secs))
                .await
            {
                Ok(true) => {
                    trace!(session_id = %id, attempt, updates = diff.len(), "Session updated");
                    return Ok(Applied::Written { attempts: attempt });
                }
                Ok(false) => {
                    debug!(session_id = %id, attempt, "Session changed concurrently, retrying");
                    last = "record changed concurrently".to_string();
                }
                Err(e) if e.is_transient() => {
                    debug!(session_id = %id, attempt, error = %e, "Transient failure writing session");
                    last = e.to_string();
                }
                Err(e) => {
                    return Err(PropagationError::Store {
                        id: id.to_string(),
                        source: e,
                    });
                }
            }
        }

        Err(PropagationError::RetriesExhausted {
            id: id.to_string(),
            attempts,
            last,
        })
    }

    /// Merge `diff` into the record inside an open transaction.
    ///
    /// No retry loop: the caller's transaction either commits the whole
    /// request or nothing.
    pub async fn apply_in(
        tx: &mut dyn StoreTransaction,
        id: &str,
        diff: &[AttributeUpdate],
        max_inactive_secs: i64,
    ) -> Result<Applied, PropagationError> {
        let to_error = |source| PropagationError::Store {
            id: id.to_string(),
            source,
        };

        let Some(current) = tx.get(id).await.map_err(to_error)? else {
            debug!(session_id = %id, "Session no longer cached, dropping update");
            return Ok(Applied::Missing);
        };

        let updated = current.with_updates(diff, max_inactive_secs, Utc::now());
        tx.put(&updated, expiry_for(max_inactive_secs))
            .await
            .map_err(to_error)?;

        trace!(session_id = %id, updates = diff.len(), "Session updated in transaction");
        Ok(Applied::Written { attempts: 1 })
    }
}
