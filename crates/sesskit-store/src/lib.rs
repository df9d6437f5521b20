//! Session persistence for sesskit.
//!
//! This crate owns everything below the per-request session logic:
//!
//! 1. **Data model**: the [`Session`] map and its [`CookieOptions`]
//! 2. **Backing clients**: the [`StoreClient`] trait plus two backends
//!    ([`FileStore`] for development, [`MemoryStore`] for tests and
//!    single-process deployments)
//! 3. **The adapter**: [`Store`], which applies key prefixing and TTL
//!    derivation on top of any client
//! 4. **Connection health**: [`HealthMonitor`], which turns the client's
//!    connect/disconnect notifications into a bounded reconnect wait
//!
//! # How it fits in the stack
//!
//! ```text
//! Session layer (above)   ← decides whether to load, save, or destroy
//!     ↕
//! Store layer (this crate) ← prefixes keys, derives TTLs, tracks health
//!     ↕
//! Backing client (below)  ← file, memory, or any remote cache
//! ```

#![allow(async_fn_in_trait)]

mod adapter;
mod client;
mod error;
mod file;
mod health;
mod memory;
mod record;

pub use adapter::{Store, StoreOptions, derive_ttl};
pub use client::{ConnectionEvent, ConnectionObserver, StoreClient};
pub use error::StoreError;
pub use file::FileStore;
pub use health::{Availability, HealthMonitor};
pub use memory::MemoryStore;
pub use record::{COOKIE_KEY, CookieOptions, Session};
