//! The backing-client seam.
//!
//! sesskit doesn't talk to Redis, Memcached, or a database directly. It
//! defines [`StoreClient`]: a raw key/value contract with optional
//! per-key expiry. Anything that can get, set, and delete a JSON value
//! by key can back a session store.
//!
//! Clients that keep a live connection can also report when it drops and
//! comes back by calling the [`ConnectionObserver`]s registered through
//! [`StoreClient::observe`]. Clients without a connection simply never
//! call them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::StoreError;

/// A change in the backing client's connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The client (re)established its connection.
    Connect,
    /// The client lost its connection.
    Disconnect,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Disconnect => f.write_str("disconnect"),
        }
    }
}

/// Callback invoked for every [`ConnectionEvent`].
///
/// Observers run synchronously on the thread that emits the event, so
/// they must be quick and must not block.
pub type ConnectionObserver = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Raw key/value access to a backing store.
///
/// Keys arrive fully prefixed; values are session records as JSON. The
/// adapter ([`Store`](crate::Store)) does all session-specific work, so
/// implementations stay dumb.
///
/// # Trait bounds
///
/// - `Send + Sync + 'static` → one client is shared by every in-flight
///   request for the lifetime of the process.
/// - The returned futures are `Send` so request handlers can run on a
///   multi-threaded runtime.
pub trait StoreClient: Send + Sync + 'static {
    /// Fetches the record under `key`. `Ok(None)` if there isn't one.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Writes `record` under `key`, expiring it after `ttl` if given.
    fn set(
        &self,
        key: &str,
        record: Value,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes `key`. Deleting a missing key is not an error.
    fn destroy(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Resets the expiry of `key` to `ttl` from now.
    ///
    /// Defaults to a no-op for clients without expiry support.
    fn refresh_ttl(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let _ = (key, ttl);
        async { Ok(()) }
    }

    /// Registers an observer for connection events.
    ///
    /// Defaults to dropping the observer: the client never disconnects.
    fn observe(&self, observer: ConnectionObserver) {
        let _ = observer;
    }

    /// Returns `true` for backends that are only meant for development.
    fn is_development_only(&self) -> bool {
        false
    }
}
