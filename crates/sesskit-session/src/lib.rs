//! Per-request session coordination for sesskit.
//!
//! Every request goes through two phases around the handler:
//!
//! 1. **Acquire** ([`SessionCoordinator::begin`]): load the session named
//!    by the request's session id, or mint a fresh one
//! 2. **Finalize** ([`SessionCoordinator::end`]): decide whether the
//!    handler's changes need saving, skipping, or destroying
//!
//! The coordinator compares content [`Fingerprint`]s instead of tracking
//! individual mutations, so an untouched session is never rewritten and a
//! brand-new session that nobody used is never stored at all.
//!
//! # How it fits in the stack
//!
//! ```text
//! Host framework (above)  ← implements RequestContext, calls scope()/begin()/end()
//!     ↕
//! Session layer (this crate) ← ids, change detection, regenerate/destroy
//!     ↕
//! Store layer (below)     ← sesskit-store: Store adapter + HealthMonitor
//! ```

mod config;
mod coordinator;
mod error;
mod fingerprint;
mod handle;
mod id;
mod request;

pub use config::{
    BeforeSave, ErrorHandler, SessionConfig, SessionValidator, SidGenerator,
};
pub use coordinator::{
    SessionCoordinator, SessionCoordinatorBuilder, SessionSnapshot,
};
pub use error::{SessionError, StoreOperation};
pub use fingerprint::{Fingerprint, fingerprint};
pub use handle::SessionHandle;
pub use id::{CookieIdStore, SESSION_ID_BYTES, SessionIdStore, generate_sid};
pub use request::{BasicRequest, OutboundCookie, RequestContext};
