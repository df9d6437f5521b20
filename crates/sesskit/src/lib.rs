//! # sesskit
//!
//! Store-backed request sessions with content-based change detection and
//! bounded waits on flaky stores.
//!
//! The host framework implements [`RequestContext`] for its request type
//! and wraps each handler in [`SessionCoordinator::scope`] (or calls
//! [`begin`](SessionCoordinator::begin) / [`end`](SessionCoordinator::end)
//! itself). sesskit loads the session named by the request's cookie,
//! hands it to the handler, and afterwards writes it back only if its
//! content changed.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sesskit::prelude::*;
//!
//! let sessions = SessionSettings::load("sessions.json")?
//!     .into_builder()
//!     .valid(|ctx, _session| ctx.query("logout").is_none())
//!     .build(MemoryStore::new());
//!
//! let visits = sessions
//!     .scope(&mut request, async |handle| {
//!         let session = handle.session_mut()?;
//!         let n = session.get::<u64>("visits").unwrap_or(0) + 1;
//!         session.insert("visits", n).ok()?;
//!         Some(n)
//!     })
//!     .await?;
//! ```

mod error;
mod logging;
mod settings;

pub use error::SesskitError;
pub use logging::init_tracing;
pub use settings::{
    ENV_KEY, ENV_PREFIX, ENV_RECONNECT_TIMEOUT_MS, ENV_TTL_MS, SessionSettings,
    SettingsError,
};

pub use sesskit_session::{
    BasicRequest, BeforeSave, CookieIdStore, ErrorHandler, Fingerprint,
    OutboundCookie, RequestContext, SESSION_ID_BYTES, SessionConfig,
    SessionCoordinator, SessionCoordinatorBuilder, SessionError, SessionHandle,
    SessionIdStore, SessionSnapshot, SessionValidator, SidGenerator,
    StoreOperation, fingerprint, generate_sid,
};
pub use sesskit_store::{
    Availability, COOKIE_KEY, ConnectionEvent, ConnectionObserver, CookieOptions,
    FileStore, HealthMonitor, MemoryStore, Session, Store, StoreClient, StoreError,
    StoreOptions, derive_ttl,
};

/// The types most hosts need, in one import.
pub mod prelude {
    pub use crate::{
        BasicRequest, CookieOptions, FileStore, MemoryStore, RequestContext, Session,
        SessionCoordinator, SessionHandle, SessionSettings, SesskitError, StoreClient,
    };
}
