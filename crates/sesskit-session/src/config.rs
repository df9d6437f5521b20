//! Session behaviour configuration.
//!
//! Plain values (cookie name, cookie defaults, the `rolling` and
//! `allow_empty_new_session` switches) sit next to hook functions that
//! let the host customize individual steps. Every hook has a default, so
//! `SessionConfig::default()` is a working configuration.

use std::fmt;
use std::sync::Arc;

use sesskit_store::{CookieOptions, Session};

use crate::{
    CookieIdStore, RequestContext, SessionError, SessionIdStore, generate_sid,
};

/// Produces a new session id. Receives the requested number of random
/// bytes and the current request.
pub type SidGenerator = Arc<dyn Fn(usize, &dyn RequestContext) -> String + Send + Sync>;

/// Decides whether a loaded session may be used. Rejected sessions are
/// replaced by a fresh one, silently.
pub type SessionValidator =
    Arc<dyn Fn(&dyn RequestContext, &Session) -> bool + Send + Sync>;

/// Last chance to modify a session right before it is saved.
pub type BeforeSave = Arc<dyn Fn(&dyn RequestContext, &mut Session) + Send + Sync>;

/// Receives persistence failures from the end of a request.
///
/// Return `Ok(())` to swallow the failure (after logging it, say), or
/// `Err` to surface it from [`end`](crate::SessionCoordinator::end).
pub type ErrorHandler = Arc<
    dyn Fn(SessionError, &dyn RequestContext) -> Result<(), SessionError>
        + Send
        + Sync,
>;

/// Configuration for a [`SessionCoordinator`](crate::SessionCoordinator).
#[derive(Clone)]
pub struct SessionConfig {
    /// Name of the cookie carrying the session id.
    ///
    /// Default: `"sesskit.sid"`.
    pub key: String,

    /// Cookie options every new session starts with. `cookie.path` also
    /// scopes which requests get a session at all.
    pub cookie: CookieOptions,

    /// Save and re-issue the session on every request, changed or not.
    pub rolling: bool,

    /// Save brand-new sessions even if the handler never touched them.
    pub allow_empty_new_session: bool,

    /// Session id generator. Default: [`generate_sid`].
    pub gen_sid: SidGenerator,

    /// Loaded-session validator. Default: accept everything.
    pub valid: SessionValidator,

    /// Pre-save hook. Default: do nothing.
    pub before_save: BeforeSave,

    /// Persistence failure handler. Default: return the error.
    pub error_handler: ErrorHandler,

    /// Where the session id travels. `None` means a [`CookieIdStore`]
    /// built from `key` and `cookie`.
    pub session_id_store: Option<Arc<dyn SessionIdStore>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key: Self::DEFAULT_KEY.to_string(),
            cookie: CookieOptions::default(),
            rolling: false,
            allow_empty_new_session: false,
            gen_sid: Arc::new(|len: usize, _ctx: &dyn RequestContext| {
                generate_sid(len)
            }),
            valid: Arc::new(|_ctx: &dyn RequestContext, _session: &Session| true),
            before_save: Arc::new(
                |_ctx: &dyn RequestContext, _session: &mut Session| {},
            ),
            error_handler: Arc::new(
                |err: SessionError, _ctx: &dyn RequestContext| Err(err),
            ),
            session_id_store: None,
        }
    }
}

impl SessionConfig {
    /// Default cookie name.
    pub const DEFAULT_KEY: &'static str = "sesskit.sid";

    /// The id store in effect: the configured one, or a cookie store.
    pub fn id_store(&self) -> Arc<dyn SessionIdStore> {
        match &self.session_id_store {
            Some(store) => Arc::clone(store),
            None => Arc::new(CookieIdStore::new(&self.key, self.cookie.clone())),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("key", &self.key)
            .field("cookie", &self.cookie)
            .field("rolling", &self.rolling)
            .field("allow_empty_new_session", &self.allow_empty_new_session)
            .field("custom_id_store", &self.session_id_store.is_some())
            .finish_non_exhaustive()
    }
}
