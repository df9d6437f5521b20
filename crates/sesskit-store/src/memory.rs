//! In-process backing client with per-key expiry.
//!
//! Expiry runs on tokio's clock, so tests can pause and advance time
//! instead of sleeping. The store can also simulate losing its
//! connection ([`MemoryStore::disconnect`]), which is how the health
//! state machine gets exercised without a real network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::{ConnectionEvent, ConnectionObserver, StoreClient, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    record: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// A [`StoreClient`] backed by a `HashMap`.
///
/// Expired entries are dropped when they're touched, and every write
/// sweeps out the rest, so sessions that are never revisited don't pile
/// up in memory.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    observers: Mutex<Vec<ConnectionObserver>>,
    connected: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty, connected store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Simulates losing the connection. Operations fail until
    /// [`connect`](Self::connect) is called.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(ConnectionEvent::Disconnect);
        }
    }

    /// Simulates the connection coming back.
    pub fn connect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.emit(ConnectionEvent::Connect);
        }
    }

    /// Returns `true` unless [`disconnect`](Self::disconnect) is in effect.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries().values().filter(|e| e.is_live(now)).count()
    }

    /// Returns `true` if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time left before `key` expires. `None` if the key is missing,
    /// expired, or has no expiry.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries();
        let entry = entries.get(key).filter(|e| e.is_live(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Drops every expired entry, returning how many were removed.
    ///
    /// [`set`](StoreClient::set) calls this on each write. Call it
    /// yourself to reclaim memory from a store that's mostly read.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    fn emit(&self, event: ConnectionEvent) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer(event);
        }
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StoreError::Backend("memory store is disconnected".into()))
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StoreClient for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.ensure_connected()?;
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.record.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        record: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let purged = self.purge_expired();
        if purged > 0 {
            debug!(purged, "memory store dropped expired entries");
        }
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries()
            .insert(key.to_string(), Entry { record, expires_at });
        Ok(())
    }

    async fn destroy(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_connected()?;
        self.entries().remove(key);
        Ok(())
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let now = Instant::now();
        if let Some(entry) = self.entries().get_mut(key) {
            if entry.is_live(now) {
                entry.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }

    fn observe(&self, observer: ConnectionObserver) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }
}
