//! The session coordinator: loads, diffs, and persists one session per
//! request.
//!
//! # Lifecycle of a request
//!
//! ```text
//! begin() ──→ handler mutates snapshot ──→ end()
//!    │                                      │
//!    ├─ path outside cookie scope → None    ├─ slot cleared   → destroy (if stored)
//!    ├─ store Unavailable → Err             ├─ new + untouched → skip
//!    ├─ no id / unknown id → fresh          ├─ unchanged (!rolling) → skip
//!    └─ known id → loaded + fingerprint     └─ otherwise → beforeSave, cookie, SET
//! ```
//!
//! [`regenerate`](SessionCoordinator::regenerate) may run anywhere in the
//! middle: it destroys the stored entry (if there is one) and swaps in a
//! fresh snapshot under a new id.

use std::sync::Arc;
use std::time::Duration;

use sesskit_store::{
    CookieOptions, HealthMonitor, Session, Store, StoreClient, StoreError,
    StoreOptions,
};
use tracing::{debug, warn};

use crate::{
    Fingerprint, RequestContext, SESSION_ID_BYTES, SessionConfig, SessionError,
    SessionHandle, SessionIdStore, StoreOperation, fingerprint, generate_sid,
};

/// How many times a custom generator may repeat the old id during
/// regeneration before the built-in generator takes over.
const REGENERATE_ATTEMPTS: usize = 3;

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// Everything the coordinator knows about one request's session.
///
/// The snapshot doubles as the session slot the handler works on:
/// [`session_mut`](Self::session_mut) to change it,
/// [`clear`](Self::clear) to ask for deletion,
/// [`freeze`](Self::freeze) to opt this request out of persistence.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    session_id: String,
    session: Option<Session>,
    /// Fingerprint of the stored content. `None` for new sessions.
    original_hash: Option<Fingerprint>,
    /// Fingerprint of the untouched fresh session. `None` for loaded ones.
    empty_hash: Option<Fingerprint>,
    is_new: bool,
    persistable: bool,
}

impl SessionSnapshot {
    fn fresh(session_id: String, session: Session) -> Result<Self, SessionError> {
        let empty_hash = fingerprint(&session)?;
        Ok(Self {
            session_id,
            session: Some(session),
            original_hash: None,
            empty_hash: Some(empty_hash),
            is_new: true,
            persistable: true,
        })
    }

    fn loaded(session_id: String, session: Session) -> Result<Self, SessionError> {
        let original_hash = fingerprint(&session)?;
        Ok(Self {
            session_id,
            session: Some(session),
            original_hash: Some(original_hash),
            empty_hash: None,
            is_new: false,
            persistable: true,
        })
    }

    /// The session id this snapshot is stored under.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// `true` until the session has been written to the store.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Fingerprint of the content last read from or written to the store.
    pub fn original_hash(&self) -> Option<Fingerprint> {
        self.original_hash
    }

    /// The session, or `None` if the handler cleared it.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Mutable access to the session, or `None` if it was cleared.
    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Puts `session` in the slot, replacing whatever was there.
    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    /// Empties the slot. At the end of the request a stored session is
    /// destroyed and the client's session cookie reset.
    pub fn clear(&mut self) -> Option<Session> {
        self.session.take()
    }

    /// Skips persistence for the rest of this request.
    pub fn freeze(&mut self) {
        self.persistable = false;
    }

    /// `false` once [`freeze`](Self::freeze) has been called.
    pub fn is_persistable(&self) -> bool {
        self.persistable
    }

    fn mark_persisted(&mut self, hash: Fingerprint) {
        self.original_hash = Some(hash);
        self.empty_hash = None;
        self.is_new = false;
    }

    fn mark_discarded(&mut self) {
        self.original_hash = None;
        self.empty_hash = None;
        self.is_new = true;
    }
}

// ---------------------------------------------------------------------------
// SessionCoordinator
// ---------------------------------------------------------------------------

struct Inner<C> {
    store: Store<C>,
    config: SessionConfig,
    id_store: Arc<dyn SessionIdStore>,
}

/// Runs the per-request session protocol against one [`Store`].
///
/// Cloning is cheap (one `Arc`), so the host can hand a clone to every
/// request task.
pub struct SessionCoordinator<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for SessionCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SessionCoordinator<()> {
    /// Starts a fluent builder.
    pub fn builder() -> SessionCoordinatorBuilder {
        SessionCoordinatorBuilder::new()
    }
}

impl<C: StoreClient> SessionCoordinator<C> {
    /// Creates a coordinator from an assembled store and configuration.
    pub fn new(store: Store<C>, config: SessionConfig) -> Self {
        let id_store = config.id_store();
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                id_store,
            }),
        }
    }

    /// The underlying store, for direct use.
    pub fn store(&self) -> &Store<C> {
        &self.inner.store
    }

    /// The configuration this coordinator runs with.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// A fresh session carrying the configured cookie defaults.
    pub fn generate_session(&self) -> Session {
        Session::new(self.inner.config.cookie.clone())
    }

    /// Whether `path` falls under the configured cookie path.
    pub fn matches_path(&self, path: &str) -> bool {
        path.starts_with(self.inner.config.cookie.scope())
    }

    // -----------------------------------------------------------------------
    // Phase 1: acquire
    // -----------------------------------------------------------------------

    /// Loads or creates the session for a request.
    ///
    /// Returns `Ok(None)` when the request path is outside the cookie
    /// scope. The id is taken from
    /// [`requested_session_id`](RequestContext::requested_session_id)
    /// first, then from the session id store. An unknown id, or a session
    /// the `valid` hook rejects, is replaced by a fresh session and the
    /// client's token is reset.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Store`] with [`StoreError::Unavailable`] if the
    ///   store is down and doesn't reconnect within the window
    /// - [`SessionError::Store`] for any backing-client failure on read
    pub async fn begin(
        &self,
        ctx: &mut dyn RequestContext,
    ) -> Result<Option<SessionSnapshot>, SessionError> {
        if !self.matches_path(ctx.path()) {
            debug!(path = %ctx.path(), "cookie path not matched, session inactive");
            return Ok(None);
        }

        self.inner.store.health().ready().await?;

        let sid = match ctx.requested_session_id() {
            Some(sid) => Some(sid.to_string()),
            None => self.inner.id_store.get(&*ctx),
        };

        let Some(sid) = sid else {
            let snapshot = self.fresh_snapshot(&*ctx)?;
            debug!(sid = %snapshot.session_id, "no session id, created new session");
            return Ok(Some(snapshot));
        };

        let loaded = self
            .inner
            .store
            .get_with_cookie(&sid, &self.inner.config.cookie)
            .await?
            .filter(|session| (self.inner.config.valid)(&*ctx, session));

        match loaded {
            Some(session) => {
                debug!(%sid, "session loaded");
                Ok(Some(SessionSnapshot::loaded(sid, session)?))
            }
            None => {
                let snapshot = self.fresh_snapshot(&*ctx)?;
                self.inner.id_store.reset(ctx);
                debug!(
                    stale = %sid,
                    sid = %snapshot.session_id,
                    "session missing or invalid, created new session"
                );
                Ok(Some(snapshot))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phase 2: finalize
    // -----------------------------------------------------------------------

    /// Persists, skips, or destroys the session in `snapshot`.
    ///
    /// Must run once the handler is done, whether or not it succeeded.
    /// Running it again with unchanged content writes nothing (unless
    /// `rolling` is on).
    ///
    /// # Errors
    ///
    /// Store failures are wrapped in [`SessionError::Persistence`] and
    /// passed to the configured error handler. Whatever the handler
    /// returns is returned here.
    pub async fn end(
        &self,
        ctx: &mut dyn RequestContext,
        snapshot: &mut SessionSnapshot,
    ) -> Result<(), SessionError> {
        let config = &self.inner.config;

        if !snapshot.persistable {
            debug!(sid = %snapshot.session_id, "session frozen, skipping save");
            return Ok(());
        }

        let Some(session) = snapshot.session.as_mut() else {
            if snapshot.is_new {
                debug!("new session cleared, nothing to destroy");
                return Ok(());
            }
            debug!(sid = %snapshot.session_id, "session cleared, destroying");
            self.inner.id_store.reset(ctx);
            return match self.persist_destroy(&snapshot.session_id).await {
                Ok(()) => {
                    snapshot.mark_discarded();
                    Ok(())
                }
                Err(source) => self.handle_failure(StoreOperation::Destroy, source, ctx),
            };
        };

        let new_hash = fingerprint(session)?;

        if !config.allow_empty_new_session
            && snapshot.is_new
            && snapshot.empty_hash == Some(new_hash)
        {
            debug!(sid = %snapshot.session_id, "new session not modified, skipping save");
            return Ok(());
        }

        if !config.rolling && snapshot.original_hash == Some(new_hash) {
            debug!(sid = %snapshot.session_id, "session not modified");
            return Ok(());
        }

        debug!(sid = %snapshot.session_id, "session modified, saving");
        (config.before_save)(&*ctx, session);
        self.inner.id_store.set(ctx, &snapshot.session_id, session);

        match self.persist_set(&snapshot.session_id, session).await {
            Ok(()) => {
                let saved = fingerprint(session)?;
                snapshot.mark_persisted(saved);
                Ok(())
            }
            Err(source) => {
                warn!(sid = %snapshot.session_id, error = %source, "session save failed");
                self.handle_failure(StoreOperation::Set, source, ctx)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Mid-request operations
    // -----------------------------------------------------------------------

    /// Replaces the snapshot with a brand-new session under a new id.
    ///
    /// A stored session is destroyed first. The new id always differs
    /// from the old one. The snapshot is only touched once every store
    /// call has succeeded.
    ///
    /// # Errors
    ///
    /// [`SessionError::Store`] if the old entry can't be destroyed. The
    /// snapshot is left as it was.
    pub async fn regenerate(
        &self,
        ctx: &mut dyn RequestContext,
        snapshot: &mut SessionSnapshot,
    ) -> Result<(), SessionError> {
        debug!(sid = %snapshot.session_id, "regenerating session");
        if !snapshot.is_new {
            debug!(sid = %snapshot.session_id, "destroying previous session");
            self.persist_destroy(&snapshot.session_id).await?;
        }

        let mut sid = self.new_sid(&*ctx);
        for _ in 1..REGENERATE_ATTEMPTS {
            if sid != snapshot.session_id {
                break;
            }
            sid = self.new_sid(&*ctx);
        }
        if sid == snapshot.session_id {
            warn!("session id generator repeated the previous id, using the default");
            sid = generate_sid(SESSION_ID_BYTES);
        }

        let mut fresh = SessionSnapshot::fresh(sid, self.generate_session())?;
        fresh.persistable = snapshot.persistable;
        self.inner.id_store.reset(ctx);
        debug!(sid = %fresh.session_id, "created new session");
        *snapshot = fresh;
        Ok(())
    }

    /// Resets the store expiry of `sid`.
    ///
    /// Without an explicit `ttl` the configured fixed TTL is used; with
    /// neither, nothing happens.
    pub async fn refresh_ttl(
        &self,
        sid: &str,
        ttl: Option<Duration>,
    ) -> Result<(), SessionError> {
        self.inner.store.health().ready().await?;
        self.inner.store.refresh_ttl(sid, ttl).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scoped helpers
    // -----------------------------------------------------------------------

    /// Runs phase 1 and wraps the result in a [`SessionHandle`].
    ///
    /// Call [`SessionHandle::finish`] when the handler is done.
    pub async fn open<'r>(
        &self,
        ctx: &'r mut dyn RequestContext,
    ) -> Result<SessionHandle<'r, C>, SessionError> {
        let snapshot = self.begin(ctx).await?;
        Ok(SessionHandle::new(self.clone(), ctx, snapshot))
    }

    /// Runs `handler` between phase 1 and phase 2.
    ///
    /// Phase 2 runs whatever `handler` returns, so a handler producing an
    /// error value still gets its session finalized.
    ///
    /// ```ignore
    /// let visits = coordinator
    ///     .scope(&mut req, async |handle| {
    ///         let session = handle.session_mut()?;
    ///         let n = session.get::<u64>("visits").unwrap_or(0) + 1;
    ///         session.insert("visits", n).ok()?;
    ///         Some(n)
    ///     })
    ///     .await?;
    /// ```
    pub async fn scope<F, T>(
        &self,
        ctx: &mut dyn RequestContext,
        handler: F,
    ) -> Result<T, SessionError>
    where
        F: AsyncFnOnce(&mut SessionHandle<'_, C>) -> T,
    {
        let mut handle = self.open(ctx).await?;
        let output = handler(&mut handle).await;
        handle.finish().await?;
        Ok(output)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn new_sid(&self, ctx: &dyn RequestContext) -> String {
        (self.inner.config.gen_sid)(SESSION_ID_BYTES, ctx)
    }

    fn fresh_snapshot(
        &self,
        ctx: &dyn RequestContext,
    ) -> Result<SessionSnapshot, SessionError> {
        SessionSnapshot::fresh(self.new_sid(ctx), self.generate_session())
    }

    async fn persist_set(&self, sid: &str, session: &Session) -> Result<(), StoreError> {
        self.inner.store.health().ready().await?;
        self.inner.store.set(sid, session).await
    }

    async fn persist_destroy(&self, sid: &str) -> Result<(), StoreError> {
        self.inner.store.health().ready().await?;
        self.inner.store.destroy(sid).await
    }

    fn handle_failure(
        &self,
        operation: StoreOperation,
        source: StoreError,
        ctx: &dyn RequestContext,
    ) -> Result<(), SessionError> {
        let err = SessionError::Persistence { operation, source };
        (self.inner.config.error_handler)(err, ctx)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Fluent assembly of a [`SessionCoordinator`] and its [`Store`].
///
/// ```ignore
/// let sessions = SessionCoordinator::builder()
///     .key("app.sid")
///     .prefix("app:sess:")
///     .rolling(true)
///     .build(MemoryStore::new());
/// ```
#[derive(Debug, Default)]
pub struct SessionCoordinatorBuilder {
    config: SessionConfig,
    store: StoreOptions,
    health: Option<Arc<HealthMonitor>>,
}

impl SessionCoordinatorBuilder {
    /// A builder with default configuration and store options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts from existing store options.
    pub fn store_options(mut self, options: StoreOptions) -> Self {
        self.store = options;
        self
    }

    /// Name of the session id cookie.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.config.key = key.into();
        self
    }

    /// Cookie defaults for new sessions.
    pub fn cookie(mut self, cookie: CookieOptions) -> Self {
        self.config.cookie = cookie;
        self
    }

    /// Re-save and re-issue the cookie on every request, changed or not.
    pub fn rolling(mut self, rolling: bool) -> Self {
        self.config.rolling = rolling;
        self
    }

    /// Persist new sessions the handler never touched.
    pub fn allow_empty_new_session(mut self, allow: bool) -> Self {
        self.config.allow_empty_new_session = allow;
        self
    }

    /// Custom session id generator. Receives the byte length the
    /// built-in generator would use.
    pub fn gen_sid<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &dyn RequestContext) -> String + Send + Sync + 'static,
    {
        self.config.gen_sid = Arc::new(f);
        self
    }

    /// Validates a loaded session. A rejected one is replaced by a fresh
    /// session.
    pub fn valid<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn RequestContext, &Session) -> bool + Send + Sync + 'static,
    {
        self.config.valid = Arc::new(f);
        self
    }

    /// Runs right before a session is written.
    pub fn before_save<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn RequestContext, &mut Session) + Send + Sync + 'static,
    {
        self.config.before_save = Arc::new(f);
        self
    }

    /// Receives phase 2 write failures. Returning `Ok` swallows the
    /// error.
    pub fn error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(SessionError, &dyn RequestContext) -> Result<(), SessionError>
            + Send
            + Sync
            + 'static,
    {
        self.config.error_handler = Arc::new(f);
        self
    }

    /// Carries the session id somewhere other than a cookie.
    pub fn session_id_store(mut self, store: impl SessionIdStore + 'static) -> Self {
        self.config.session_id_store = Some(Arc::new(store));
        self
    }

    /// Store key prefix. Default: `"sess:"`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.store.prefix = prefix.into();
        self
    }

    /// Fixed TTL for every write.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.store.ttl = Some(ttl);
        self
    }

    /// How long to wait for a dropped store connection to come back.
    pub fn reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.store.reconnect_timeout = timeout;
        self
    }

    /// Reports into an existing health monitor instead of a new one.
    /// Overrides [`reconnect_timeout`](Self::reconnect_timeout).
    pub fn health(mut self, health: Arc<HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    /// Wraps `client` in a [`Store`] and builds the coordinator.
    pub fn build<C: StoreClient>(self, client: C) -> SessionCoordinator<C> {
        let store = match self.health {
            Some(health) => Store::with_health(client, self.store, health),
            None => Store::new(client, self.store),
        };
        SessionCoordinator::new(store, self.config)
    }
}
