//! Per-request orchestration: bind a request to a cached session, run the
//! downstream handler against it, and write its changes back.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::container::SessionContainer;
use crate::error::{ConfigError, ContainerError, GatewayError, StoreResult};
use crate::id;
use crate::propagator::UpdatePropagator;
use crate::proxy::{Session, SessionProxy};
use crate::record::SessionRecord;
use crate::store::{
    AtomicityMode, CacheDescriptor, CacheMode, SessionStore, StoreTransaction, WriteSyncMode,
};

/// How a gateway keeps concurrent requests for one session consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyMode {
    /// Independent cache operations; write-back retried on transient failure.
    Atomic,
    /// Each request runs inside one pessimistic, repeatable-read transaction.
    Transactional,
}

impl From<AtomicityMode> for ConsistencyMode {
    fn from(mode: AtomicityMode) -> Self {
        match mode {
            AtomicityMode::Atomic => ConsistencyMode::Atomic,
            AtomicityMode::Transactional => ConsistencyMode::Transactional,
        }
    }
}

impl fmt::Display for ConsistencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyMode::Atomic => write!(f, "ATOMIC"),
            ConsistencyMode::Transactional => write!(f, "TRANSACTIONAL"),
        }
    }
}

/// Reject caches under which session consistency cannot be guaranteed.
pub fn validate_descriptor(descriptor: &CacheDescriptor) -> Result<(), ConfigError> {
    let name = descriptor.display_name();

    if descriptor.write_sync == WriteSyncMode::FullAsync {
        return Err(ConfigError::FullAsyncWrites(name.to_string()));
    }

    if !descriptor.eager_ttl {
        return Err(ConfigError::LazyExpiry(name.to_string()));
    }

    if descriptor.mode == CacheMode::Local {
        warn!(cache = %name, "Using LOCAL cache for web sessions caching (this is only OK in test mode)");
    }

    if descriptor.mode == CacheMode::Partitioned
        && descriptor.atomicity != AtomicityMode::Atomic
    {
        warn!(
            cache = %name,
            "Using TRANSACTIONAL atomicity for web sessions caching (switch to ATOMIC mode for better performance)"
        );
    }

    Ok(())
}

/// Cache operations available while binding a request: either directly
/// against the store or inside the request's transaction.
enum Scope<'a> {
    Direct(&'a dyn SessionStore),
    Tx(&'a mut dyn StoreTransaction),
}

impl Scope<'_> {
    async fn get(&mut self, id: &str) -> StoreResult<Option<SessionRecord>> {
        match self {
            Scope::Direct(store) => store.get(id).await,
            Scope::Tx(tx) => tx.get(id).await,
        }
    }

    async fn put_if_absent(&mut self, record: &SessionRecord) -> StoreResult<Option<SessionRecord>> {
        let expiry = record.expiry();
        match self {
            Scope::Direct(store) => store.put_if_absent(record, expiry).await,
            Scope::Tx(tx) => tx.put_if_absent(record, expiry).await,
        }
    }
}

/// Binds each request to a replicated session record.
///
/// One gateway serves one cache. The downstream handler only ever sees the
/// [`Session`] handle; once it returns, the changes it made are written back.
/// Write-back failures are logged and never fail the request.
pub struct SessionGateway {
    store: Arc<dyn SessionStore>,
    container: Arc<dyn SessionContainer>,
    propagator: UpdatePropagator,
    mode: ConsistencyMode,
    config: GatewayConfig,
}

impl SessionGateway {
    /// Build a gateway over `store`, validating the cache configuration.
    pub fn new(
        store: Arc<dyn SessionStore>,
        container: Arc<dyn SessionContainer>,
        config: GatewayConfig,
    ) -> Result<Self, ConfigError> {
        let descriptor = store.descriptor();

        if let Some(expected) = &config.cache_name
            && descriptor.name.as_ref() != Some(expected)
        {
            return Err(ConfigError::CacheNameMismatch {
                expected: expected.clone(),
                found: descriptor.display_name().to_string(),
            });
        }

        validate_descriptor(descriptor)?;

        let mode = ConsistencyMode::from(descriptor.atomicity);

        info!(
            cache = %descriptor.display_name(),
            mode = %mode,
            max_retries = config.max_retries,
            "Started web sessions caching"
        );

        Ok(Self {
            propagator: UpdatePropagator::new(Arc::clone(&store), config.max_retries),
            store,
            container,
            mode,
            config,
        })
    }

    pub fn mode(&self) -> ConsistencyMode {
        self.mode
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run `handler` for one request.
    ///
    /// `requested_id` is the raw id the client presented, if any. The handler
    /// receives the bound [`Session`]. If it returns an error nothing is
    /// written back and, in TRANSACTIONAL mode, the transaction is rolled
    /// back. Write-back runs in its own task so that dropping this future
    /// after the handler has finished does not cancel it.
    pub async fn handle<F, Fut, T, E>(&self, requested_id: Option<&str>, handler: F) -> Result<T, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<GatewayError>,
    {
        match self.mode {
            ConsistencyMode::Atomic => {
                let session = self
                    .bind(&mut Scope::Direct(self.store.as_ref()), requested_id)
                    .await?;

                let value = handler(session.clone()).await?;
                self.write_back(session).await;
                Ok(value)
            }
            ConsistencyMode::Transactional => {
                let mut tx = self.store.begin().await.map_err(GatewayError::Transaction)?;

                let bound = self.bind(&mut Scope::Tx(tx.as_mut()), requested_id).await;
                let session = match bound {
                    Ok(session) => session,
                    Err(e) => {
                        rollback(tx, None).await;
                        return Err(e.into());
                    }
                };

                match handler(session.clone()).await {
                    Ok(value) => {
                        self.write_back_in(tx, session).await;
                        Ok(value)
                    }
                    Err(e) => {
                        rollback(tx, Some(&session.id())).await;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Resolve the record for this request and wrap it in a fresh proxy.
    async fn bind(
        &self,
        scope: &mut Scope<'_>,
        requested_id: Option<&str>,
    ) -> Result<Session, GatewayError> {
        let record = match requested_id {
            Some(raw_id) => {
                let id = id::normalize(raw_id);
                let cached = scope.get(id).await.map_err(|source| GatewayError::Bind {
                    id: id.to_string(),
                    source,
                })?;

                match cached {
                    Some(record) => {
                        debug!(session_id = %id, "Using cached session");
                        if record.is_new { record.not_new() } else { record }
                    }
                    None => {
                        debug!(session_id = %id, "Cached session was invalidated and doesn't exist");
                        self.invalidate_local(raw_id);
                        self.create(scope, Some(raw_id)).await?
                    }
                }
            }
            None => self.create(scope, None).await?,
        };

        let mut proxy = SessionProxy::new(record);
        proxy.reset_updates();
        Ok(Session::bind(proxy))
    }

    fn invalidate_local(&self, raw_id: &str) {
        if self.container.get_session(Some(raw_id), false).is_none() {
            return;
        }
        if let Err(ContainerError::AlreadyInvalidated(_)) = self.container.invalidate(raw_id) {
            debug!(session_id = %raw_id, "Local session already invalidated");
        }
    }

    /// Create a record for a new container session and install it.
    ///
    /// If another node installed a record under the same id first, that
    /// record is adopted and it is not new for this node.
    async fn create(
        &self,
        scope: &mut Scope<'_>,
        raw_id: Option<&str>,
    ) -> Result<SessionRecord, GatewayError> {
        let local = self
            .container
            .get_session(raw_id, true)
            .ok_or(GatewayError::NoContainerSession)?;

        let id = id::normalize(&local.raw_id);
        debug!(session_id = %id, "Session created");

        let record = SessionRecord::new(id, local.created_at, local.max_inactive_secs);

        loop {
            match scope.put_if_absent(&record).await {
                Ok(None) => return Ok(record),
                Ok(Some(existing)) => {
                    debug!(session_id = %id, "Session created concurrently elsewhere, adopting");
                    return Ok(if existing.is_new { existing.not_new() } else { existing });
                }
                Err(e) if e.is_transient() => {
                    debug!(session_id = %id, error = %e, "Transient failure saving new session, retrying");
                    tokio::task::yield_now().await;
                }
                Err(source) => {
                    return Err(GatewayError::Bind {
                        id: id.to_string(),
                        source,
                    });
                }
            }
        }
    }

    async fn write_back(&self, session: Session) {
        let Some((diff, max_inactive_secs)) = session.drain() else {
            return;
        };
        let id = session.id();
        let propagator = self.propagator.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = propagator.apply(&id, &diff, max_inactive_secs).await {
                error!(session_id = %id, error = %e, "Failed to update web session");
            }
        });

        if let Err(e) = task.await {
            error!(error = %e, "Web session update task failed");
        }
    }

    async fn write_back_in(&self, tx: Box<dyn StoreTransaction>, session: Session) {
        let pending = session.drain();
        let id = session.id();

        let task = tokio::spawn(async move {
            let mut tx = tx;
            let applied = match pending {
                Some((diff, max_inactive_secs)) => {
                    UpdatePropagator::apply_in(tx.as_mut(), &id, &diff, max_inactive_secs)
                        .await
                        .map(|_| ())
                }
                None => Ok(()),
            };

            if let Err(e) = applied {
                error!(session_id = %id, error = %e, "Failed to update web session");
                rollback(tx, Some(&id)).await;
                return;
            }

            if let Err(e) = tx.commit().await {
                error!(session_id = %id, error = %e, "Failed to commit web session transaction");
            }
        });

        if let Err(e) = task.await {
            error!(error = %e, "Web session update task failed");
        }
    }
}

async fn rollback(tx: Box<dyn StoreTransaction>, id: Option<&str>) {
    if let Err(e) = tx.rollback().await {
        error!(session_id = ?id, error = %e, "Failed to roll back web session transaction");
    }
}

impl fmt::Debug for SessionGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGateway")
            .field("cache", &self.store.descriptor().display_name())
            .field("mode", &self.mode)
            .field("max_retries", &self.config.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::json;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::container::ContainerSession;
    use crate::error::StoreError;
    use crate::memory::MemoryStore;

    /// Container issuing sequential ids, optionally with a routing suffix.
    #[derive(Default)]
    struct TestContainer {
        sessions: Mutex<HashMap<String, ContainerSession>>,
        next: Mutex<u32>,
        suffix: bool,
    }

    impl SessionContainer for TestContainer {
        fn get_session(&self, raw_id: Option<&str>, create: bool) -> Option<ContainerSession> {
            let mut sessions = self.sessions.lock();
            if let Some(found) = raw_id.and_then(|id| sessions.get(id)) {
                return Some(found.clone());
            }
            if !create {
                return None;
            }
            let raw_id = raw_id.map(str::to_string).unwrap_or_else(|| self.generate_id());
            let session = ContainerSession {
                raw_id: raw_id.clone(),
                created_at: Utc::now(),
                max_inactive_secs: 60,
            };
            sessions.insert(raw_id, session.clone());
            Some(session)
        }

        fn generate_id(&self) -> String {
            let mut next = self.next.lock();
            *next += 1;
            if self.suffix {
                format!("sid{}!-5083!1385045122601", *next)
            } else {
                format!("sid{}", *next)
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

    /// Fails the first `failures` creations with `error`, then delegates.
    struct FailingCreateStore {
        inner: MemoryStore,
        failures: u32,
        error: StoreError,
        calls: AtomicU32,
    }

    impl FailingCreateStore {
        fn new(failures: u32, error: StoreError) -> Self {
            Self {
                inner: MemoryStore::with_atomicity(AtomicityMode::Atomic),
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionStore for FailingCreateStore {
        fn descriptor(&self) -> &CacheDescriptor {
            self.inner.descriptor()
        }

        async fn get(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
            self.inner.get(id).await
        }

        async fn put_if_absent(
            &self,
            record: &SessionRecord,
            expiry: Option<Duration>,
        ) -> StoreResult<Option<SessionRecord>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(self.error.clone());
            }
            self.inner.put_if_absent(record, expiry).await
        }

        async fn replace(
            &self,
            current: &SessionRecord,
            updated: &SessionRecord,
            expiry: Option<Duration>,
        ) -> StoreResult<bool> {
            self.inner.replace(current, updated, expiry).await
        }
    }

    fn gateway(store: &MemoryStore) -> SessionGateway {
        SessionGateway::new(
            Arc::new(store.clone()),
            Arc::new(TestContainer::default()),
            GatewayConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_session_created_and_written() {
        let store = MemoryStore::with_atomicity(AtomicityMode::Atomic);
        let gateway = gateway(&store);

        let id = gateway
            .handle(None, |session| async move {
                assert!(session.is_new());
                session.set("user", "ana").unwrap();
                Ok::<_, GatewayError>(session.id())
            })
            .await
            .unwrap();

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.attributes["user"], json!("ana"));
        assert!(!stored.is_new);
    }

    #[tokio::test]
    async fn test_creation_retries_transient_failures() {
        let store = Arc::new(FailingCreateStore::new(
            3,
            StoreError::PartialUpdate("node-2".into()),
        ));
        let gateway = SessionGateway::new(
            store.clone(),
            Arc::new(TestContainer::default()),
            GatewayConfig::default(),
        )
        .unwrap();

        let (id, new) = gateway
            .handle(None, |session| async move {
                Ok::<_, GatewayError>((session.id(), session.is_new()))
            })
            .await
            .unwrap();

        assert!(new);
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
        let stored = store.get(&id).await.unwrap().unwrap();
        assert!(stored.is_new);
    }

    #[tokio::test]
    async fn test_creation_hard_failure_is_bind_error() {
        let store = Arc::new(FailingCreateStore::new(
            u32::MAX,
            StoreError::Serialization("bad payload".into()),
        ));
        let gateway = SessionGateway::new(
            store.clone(),
            Arc::new(TestContainer::default()),
            GatewayConfig::default(),
        )
        .unwrap();

        let mut ran = false;
        let result = gateway
            .handle(None, |_session| {
                ran = true;
                async { Ok::<_, GatewayError>(()) }
            })
            .await;

        assert!(matches!(
            result,
            Err(GatewayError::Bind { ref id, source: StoreError::Serialization(_) }) if id == "sid1"
        ));
        assert!(!ran);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_session_reused() {
        let store = MemoryStore::with_atomicity(AtomicityMode::Atomic);
        let gateway = gateway(&store);

        let id = gateway
            .handle(None, |session| async move {
                session.set("n", 1).unwrap();
                Ok::<_, GatewayError>(session.id())
            })
            .await
            .unwrap();

        let (same, n, new) = gateway
            .handle(Some(&id), |session| async move {
                Ok::<_, GatewayError>((session.id(), session.get::<i32>("n"), session.is_new()))
            })
            .await
            .unwrap();

        assert_eq!(same, id);
        assert_eq!(n, Some(1));
        assert!(!new);
    }

    #[tokio::test]
    async fn test_new_flag_cleared_for_next_reader() {
        let store = MemoryStore::with_atomicity(AtomicityMode::Atomic);
        let gateway = gateway(&store);

        // No changes, so nothing is written back and the stored record stays new
        let id = gateway
            .handle(None, |session| async move { Ok::<_, GatewayError>(session.id()) })
            .await
            .unwrap();
        assert!(store.get(&id).await.unwrap().unwrap().is_new);

        let new = gateway
            .handle(Some(&id), |session| async move {
                Ok::<_, GatewayError>(session.is_new())
            })
            .await
            .unwrap();
        assert!(!new);
    }

    #[tokio::test]
    async fn test_missing_session_recreated() {
        let store = MemoryStore::with_atomicity(AtomicityMode::Atomic);
        let container = Arc::new(TestContainer::default());
        container.get_session(Some("stale"), true);
        let gateway = SessionGateway::new(
            Arc::new(store.clone()),
            container.clone(),
            GatewayConfig::default(),
        )
        .unwrap();

        let (id, new) = gateway
            .handle(Some("stale"), |session| async move {
                Ok::<_, GatewayError>((session.id(), session.is_new()))
            })
            .await
            .unwrap();

        assert_eq!(id, "stale");
        assert!(new);
        assert!(store.get("stale").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ids_normalized() {
        let store = MemoryStore::with_atomicity(AtomicityMode::Atomic);
        let container = Arc::new(TestContainer {
            suffix: true,
            ..Default::default()
        });
        let gateway =
            SessionGateway::new(Arc::new(store.clone()), container, GatewayConfig::default())
                .unwrap();

        let id = gateway
            .handle(None, |session| async move {
                session.set("k", "v").unwrap();
                Ok::<_, GatewayError>(session.id())
            })
            .await
            .unwrap();
        assert_eq!(id, "sid1");

        // A client presenting the suffixed id reaches the same record
        let value = gateway
            .handle(Some("sid1!-5083!1385045122601"), |session| async move {
                Ok::<_, GatewayError>(session.get::<String>("k"))
            })
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_handler_error_skips_write_back() {
        let store = MemoryStore::with_atomicity(AtomicityMode::Atomic);
        let gateway = gateway(&store);

        let id = gateway
            .handle(None, |session| async move { Ok::<_, GatewayError>(session.id()) })
            .await
            .unwrap();

        let result: Result<(), GatewayError> = gateway
            .handle(Some(&id), |session| async move {
                session.set("k", "v").unwrap();
                Err(GatewayError::NoContainerSession)
            })
            .await;
        assert!(result.is_err());
        assert!(store.get(&id).await.unwrap().unwrap().attributes.is_empty());
    }

    #[tokio::test]
    async fn test_transactional_handler_error_rolls_back() {
        let store = MemoryStore::with_atomicity(AtomicityMode::Transactional);
        let gateway = gateway(&store);
        assert_eq!(gateway.mode(), ConsistencyMode::Transactional);

        let result: Result<(), GatewayError> = gateway
            .handle(None, |session| async move {
                session.set("k", "v").unwrap();
                Err(GatewayError::NoContainerSession)
            })
            .await;
        assert!(result.is_err());
        // Even the creation was discarded
        assert_eq!(store.stats().size, 0);
    }

    #[tokio::test]
    async fn test_timeout_change_reapplies_expiry() {
        let store = MemoryStore::with_atomicity(AtomicityMode::Atomic);
        let gateway = gateway(&store);

        let id = gateway
            .handle(None, |session| async move {
                session.set_max_inactive_secs(0);
                Ok::<_, GatewayError>(session.id())
            })
            .await
            .unwrap();

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.max_inactive_secs, 0);
        assert_eq!(store.stats().expiring, 0);
    }

    #[test]
    fn test_rejects_full_async() {
        let descriptor = CacheDescriptor::default().with_write_sync(WriteSyncMode::FullAsync);
        assert!(matches!(
            validate_descriptor(&descriptor),
            Err(ConfigError::FullAsyncWrites(_))
        ));
    }

    #[test]
    fn test_rejects_lazy_ttl() {
        let descriptor = CacheDescriptor::default().with_eager_ttl(false);
        assert!(matches!(
            validate_descriptor(&descriptor),
            Err(ConfigError::LazyExpiry(_))
        ));
    }

    #[test]
    fn test_local_and_transactional_allowed() {
        let descriptor = CacheDescriptor::default()
            .with_mode(CacheMode::Local)
            .with_atomicity(AtomicityMode::Transactional);
        assert!(validate_descriptor(&descriptor).is_ok());
    }

    #[test]
    fn test_cache_name_must_match() {
        let store = MemoryStore::new(
            CacheDescriptor::default().with_name("sessions"),
            Default::default(),
        );
        let err = SessionGateway::new(
            Arc::new(store),
            Arc::new(TestContainer::default()),
            GatewayConfig::new().with_cache_name("other"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::CacheNameMismatch { .. }));
    }
}
