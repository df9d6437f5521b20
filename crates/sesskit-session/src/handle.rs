//! Scoped access to one request's session.
//!
//! A [`SessionHandle`] bundles the coordinator, the request, and the
//! snapshot from phase 1, so the handler can work with the session
//! without threading all three around. [`finish`](SessionHandle::finish)
//! runs phase 2.
//!
//! Phase 2 is async and `Drop` can't await, so a handle dropped without
//! finishing (a panic, an early `?`) only logs a warning. Prefer
//! [`SessionCoordinator::scope`], which always finishes.

use std::time::Duration;

use sesskit_store::{Session, Store, StoreClient};
use tracing::warn;

use crate::{RequestContext, SessionCoordinator, SessionError, SessionSnapshot};

/// One request's session, between [`open`](SessionCoordinator::open)
/// and [`finish`](Self::finish).
///
/// An *inactive* handle (the request path was outside the cookie scope)
/// has no session: accessors return `None` and operations that need a
/// session return [`SessionError::Inactive`].
pub struct SessionHandle<'r, C> {
    coordinator: SessionCoordinator<C>,
    ctx: &'r mut dyn RequestContext,
    snapshot: Option<SessionSnapshot>,
    finished: bool,
}

impl<'r, C: StoreClient> SessionHandle<'r, C> {
    pub(crate) fn new(
        coordinator: SessionCoordinator<C>,
        ctx: &'r mut dyn RequestContext,
        snapshot: Option<SessionSnapshot>,
    ) -> Self {
        Self {
            coordinator,
            ctx,
            snapshot,
            finished: false,
        }
    }

    /// `false` when the request is outside the cookie scope.
    pub fn is_active(&self) -> bool {
        self.snapshot.is_some()
    }

    /// The session, or `None` if inactive or cleared.
    pub fn session(&self) -> Option<&Session> {
        self.snapshot.as_ref().and_then(SessionSnapshot::session)
    }

    /// Mutable access to the session. Changes are persisted by
    /// [`finish`](Self::finish).
    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.snapshot.as_mut().and_then(SessionSnapshot::session_mut)
    }

    /// Replaces the session.
    ///
    /// # Errors
    /// [`SessionError::Inactive`] if the handle has no snapshot.
    pub fn set_session(&mut self, session: Session) -> Result<(), SessionError> {
        self.active_mut()?.set_session(session);
        Ok(())
    }

    /// Clears the session. [`finish`](Self::finish) then destroys the
    /// stored copy and resets the client's session cookie.
    pub fn clear(&mut self) -> Option<Session> {
        self.snapshot.as_mut().and_then(SessionSnapshot::clear)
    }

    /// The current session id. Changes after [`regenerate`](Self::regenerate).
    pub fn session_id(&self) -> Option<&str> {
        self.snapshot.as_ref().map(SessionSnapshot::session_id)
    }

    /// `true` while the session has never been stored.
    pub fn is_new(&self) -> bool {
        self.snapshot.as_ref().is_some_and(SessionSnapshot::is_new)
    }

    /// Opts this request out of persistence. [`finish`](Self::finish)
    /// becomes a no-op.
    pub fn freeze(&mut self) {
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.freeze();
        }
    }

    /// `false` once frozen, or when inactive.
    pub fn is_persistable(&self) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(SessionSnapshot::is_persistable)
    }

    /// The phase 1 snapshot, if the handle is active.
    pub fn snapshot(&self) -> Option<&SessionSnapshot> {
        self.snapshot.as_ref()
    }

    /// The request this handle was opened for.
    pub fn request(&self) -> &dyn RequestContext {
        &*self.ctx
    }

    /// Mutable access to the request, for headers and cookies the
    /// handler sets itself.
    pub fn request_mut(&mut self) -> &mut dyn RequestContext {
        &mut *self.ctx
    }

    /// The underlying store.
    pub fn store(&self) -> &Store<C> {
        self.coordinator.store()
    }

    /// Swaps in a brand-new session under a new id, destroying the
    /// stored one first. See [`SessionCoordinator::regenerate`].
    pub async fn regenerate(&mut self) -> Result<(), SessionError> {
        let snapshot = self.snapshot.as_mut().ok_or(SessionError::Inactive)?;
        self.coordinator.regenerate(&mut *self.ctx, snapshot).await
    }

    /// Resets the store expiry of the current session. See
    /// [`SessionCoordinator::refresh_ttl`].
    pub async fn refresh_ttl(&self, ttl: Option<Duration>) -> Result<(), SessionError> {
        let sid = self.session_id().ok_or(SessionError::Inactive)?;
        self.coordinator.refresh_ttl(sid, ttl).await
    }

    /// Runs phase 2. Calling it again is allowed and persists any
    /// changes made since.
    pub async fn finish(&mut self) -> Result<(), SessionError> {
        self.finished = true;
        match self.snapshot.as_mut() {
            Some(snapshot) => self.coordinator.end(&mut *self.ctx, snapshot).await,
            None => Ok(()),
        }
    }

    fn active_mut(&mut self) -> Result<&mut SessionSnapshot, SessionError> {
        self.snapshot.as_mut().ok_or(SessionError::Inactive)
    }
}

impl<C> Drop for SessionHandle<'_, C> {
    fn drop(&mut self) {
        let pending = self
            .snapshot
            .as_ref()
            .is_some_and(SessionSnapshot::is_persistable);
        if pending && !self.finished {
            warn!(
                sid = self.snapshot.as_ref().map(SessionSnapshot::session_id),
                "session handle dropped without finish, changes not saved"
            );
        }
    }
}
