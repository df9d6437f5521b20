//! Single-file JSON backend for development.
//!
//! The whole store is one JSON object (`key -> record`) kept in memory.
//! It's read from disk on first use and rewritten in full after every
//! change. No TTLs, no crash safety, no cross-process coordination:
//! good enough to click around a dev server, nothing more.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::{StoreClient, StoreError};

type Document = Map<String, Value>;

/// A [`StoreClient`] persisting every record into one JSON file.
///
/// Writes are serialized through an async mutex, so concurrent requests
/// in one process don't clobber each other. Multiple processes sharing
/// the file will.
pub struct FileStore {
    path: PathBuf,
    document: Mutex<Option<Document>>,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FILE)
    }
}

impl FileStore {
    /// File used by [`FileStore::default`], relative to the working
    /// directory.
    pub const DEFAULT_FILE: &'static str = "sessions.json";

    /// Creates a store backed by `path`. Nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Mutex::new(None),
        }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Locks the in-memory document, loading it from disk the first time.
    async fn document(&self) -> Result<MutexGuard<'_, Option<Document>>, StoreError> {
        let mut guard = self.document.lock().await;
        if guard.is_none() {
            let loaded = match tokio::fs::read_to_string(&self.path).await {
                Ok(text) if text.trim().is_empty() => Document::new(),
                Ok(text) => serde_json::from_str(&text)?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => Document::new(),
                Err(e) => return Err(e.into()),
            };
            debug!(
                path = %self.path.display(),
                records = loaded.len(),
                "file store loaded"
            );
            *guard = Some(loaded);
        }
        Ok(guard)
    }

    async fn sync(&self, document: &Document) -> Result<(), StoreError> {
        let text = serde_json::to_string(document)?;
        tokio::fs::write(&self.path, text).await?;
        debug!(path = %self.path.display(), "file store synced");
        Ok(())
    }
}

impl StoreClient for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let guard = self.document().await?;
        let record = guard.as_ref().and_then(|doc| doc.get(key)).cloned();
        debug!(%key, found = record.is_some(), "file store get");
        Ok(record)
    }

    async fn set(
        &self,
        key: &str,
        record: Value,
        _ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut guard = self.document().await?;
        let document = guard.get_or_insert_with(Document::new);
        document.insert(key.to_string(), record);
        self.sync(document).await
    }

    async fn destroy(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.document().await?;
        let document = guard.get_or_insert_with(Document::new);
        document.remove(key);
        self.sync(document).await
    }

    fn is_development_only(&self) -> bool {
        true
    }
}
