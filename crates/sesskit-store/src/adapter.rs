//! The keyed store adapter.
//!
//! [`Store`] wraps any [`StoreClient`] and gives the session layer one
//! uniform contract: `get` / `set` / `destroy` / `refresh_ttl`, all by
//! bare session id. On the way down it:
//!
//! - prefixes every key (`"sess:" + sid` by default)
//! - derives a TTL for each write from the session's cookie
//! - serializes the session into its JSON record
//!
//! On the way up it rebuilds the [`Session`], including turning stored
//! `cookie.expires` strings back into absolute times.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    Availability, ConnectionEvent, ConnectionObserver, CookieOptions,
    HealthMonitor, Session, StoreClient, StoreError,
};

// ---------------------------------------------------------------------------
// StoreOptions
// ---------------------------------------------------------------------------

/// Construction-time options for a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Prepended to every session id to form the backing key.
    ///
    /// Default: `"sess:"`.
    pub prefix: String,

    /// Fixed TTL applied to every write, overriding anything derived
    /// from the session cookie. `None` (or zero) means "derive".
    pub ttl: Option<Duration>,

    /// Reconnect window for the store's [`HealthMonitor`].
    ///
    /// Default: 10 seconds. Ignored by [`Store::with_health`], which
    /// takes an already-configured monitor.
    pub reconnect_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            prefix: "sess:".to_string(),
            ttl: None,
            reconnect_timeout: HealthMonitor::DEFAULT_RECONNECT_TIMEOUT,
        }
    }
}

// ---------------------------------------------------------------------------
// TTL derivation
// ---------------------------------------------------------------------------

/// Works out how long a session record should live in the store.
///
/// Rules, in order:
///
/// 1. A non-zero `fixed` TTL wins outright.
/// 2. Otherwise `cookie.max_age` is used, if set.
/// 3. If `cookie.expires` is set it overrides `max_age`: the TTL is the
///    time left until `expires`, rounded up to the millisecond and
///    clamped at zero.
///
/// `None` means the record never expires on its own.
pub fn derive_ttl(
    fixed: Option<Duration>,
    cookie: &CookieOptions,
    now: DateTime<Utc>,
) -> Option<Duration> {
    if let Some(ttl) = fixed.filter(|ttl| !ttl.is_zero()) {
        return Some(ttl);
    }

    let mut ttl = cookie.max_age.map(Duration::from_millis);

    if let Some(expires) = cookie.expires {
        let remaining = expires - now;
        let mut millis = remaining.num_milliseconds();
        if remaining - TimeDelta::milliseconds(millis) > TimeDelta::zero() {
            millis += 1;
        }
        ttl = Some(Duration::from_millis(millis.max(0) as u64));
    }

    ttl
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Uniform session persistence on top of a [`StoreClient`].
///
/// Also the owner of the store's [`HealthMonitor`]: construction hooks
/// the client's connection events into the monitor and into any
/// observers registered through [`on_connection_event`](Self::on_connection_event).
pub struct Store<C> {
    client: Arc<C>,
    prefix: String,
    ttl: Option<Duration>,
    health: Arc<HealthMonitor>,
    observers: Arc<Mutex<Vec<ConnectionObserver>>>,
}

impl<C: StoreClient> Store<C> {
    /// Creates an adapter with its own health monitor.
    pub fn new(client: C, options: StoreOptions) -> Self {
        let health = Arc::new(HealthMonitor::new(options.reconnect_timeout));
        Self::with_health(client, options, health)
    }

    /// Creates an adapter that reports into an existing health monitor.
    pub fn with_health(
        client: C,
        options: StoreOptions,
        health: Arc<HealthMonitor>,
    ) -> Self {
        if client.is_development_only() && !cfg!(debug_assertions) {
            warn!(
                "session store backend is meant for development only; \
                 use a real cache in production"
            );
        }

        let observers: Arc<Mutex<Vec<ConnectionObserver>>> = Arc::default();
        let forward: ConnectionObserver = {
            let health = Arc::clone(&health);
            let observers = Arc::clone(&observers);
            Arc::new(move |event: ConnectionEvent| {
                debug!(%event, "session store connection event");
                health.observe(event);
                // Snapshot the list so an observer can register another
                // one without deadlocking.
                let current = observers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for observer in current {
                    observer(event);
                }
            })
        };
        client.observe(forward);

        Self {
            client: Arc::new(client),
            prefix: options.prefix,
            ttl: options.ttl,
            health,
            observers,
        }
    }

    /// Registers an observer that sees every client connection event,
    /// unchanged.
    pub fn on_connection_event(&self, observer: ConnectionObserver) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// The backing key for a session id.
    pub fn key(&self, sid: &str) -> String {
        format!("{}{}", self.prefix, sid)
    }

    /// The configured key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The configured fixed TTL, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// The backing client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The health monitor fed by this store's client.
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Shorthand for `self.health().availability()`.
    pub fn availability(&self) -> Availability {
        self.health.availability()
    }

    /// Loads the session stored under `sid`.
    ///
    /// A missing key is `Ok(None)`. Client errors are returned as-is.
    pub async fn get(&self, sid: &str) -> Result<Option<Session>, StoreError> {
        let Some(record) = self.fetch(sid).await? else {
            return Ok(None);
        };
        Ok(Some(Session::from_record(record)?))
    }

    /// Like [`get`](Self::get), but a record stored without a `cookie`
    /// object gets `cookie` rather than the built-in defaults.
    pub async fn get_with_cookie(
        &self,
        sid: &str,
        cookie: &CookieOptions,
    ) -> Result<Option<Session>, StoreError> {
        let Some(record) = self.fetch(sid).await? else {
            return Ok(None);
        };
        Ok(Some(Session::from_record_with_cookie(record, cookie)?))
    }

    async fn fetch(&self, sid: &str) -> Result<Option<Value>, StoreError> {
        let key = self.key(sid);
        debug!(%key, "GET");
        let record = self.client.get(&key).await?;
        if record.is_none() {
            debug!(%key, "GET empty");
        }
        Ok(record)
    }

    /// Writes `session` under `sid` with a derived TTL.
    pub async fn set(&self, sid: &str, session: &Session) -> Result<(), StoreError> {
        let key = self.key(sid);
        let ttl = derive_ttl(self.ttl, &session.cookie, Utc::now());
        let record = session.to_record()?;
        debug!(
            %key,
            ttl_ms = ttl.map(|t| t.as_millis() as u64),
            "SET"
        );
        self.client.set(&key, record, ttl).await?;
        debug!(%key, "SET complete");
        Ok(())
    }

    /// Deletes the session stored under `sid`.
    pub async fn destroy(&self, sid: &str) -> Result<(), StoreError> {
        let key = self.key(sid);
        debug!(%key, "DEL");
        self.client.destroy(&key).await?;
        debug!(%key, "DEL complete");
        Ok(())
    }

    /// Resets the expiry of `sid` to `ttl`, falling back to the fixed
    /// TTL. With neither, nothing happens.
    pub async fn refresh_ttl(
        &self,
        sid: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let Some(ttl) = ttl.or(self.ttl) else {
            return Ok(());
        };
        let key = self.key(sid);
        debug!(%key, ttl_ms = ttl.as_millis() as u64, "TTL");
        self.client.refresh_ttl(&key, ttl).await
    }
}
