//! Error types for the store layer.

/// Errors that can occur while talking to a session store.
///
/// A missing key is never an error: [`Store::get`](crate::Store::get)
/// returns `Ok(None)` for it. Everything here means the store could not
/// answer at all.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store stayed disconnected past the reconnect window,
    /// or is already known to be down.
    #[error("session store is unavailable")]
    Unavailable,

    /// Reading or writing the backing file failed.
    #[error("session store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be encoded or decoded.
    #[error("session record is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The backing client reported a failure of its own.
    #[error("session store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns `true` for [`StoreError::Unavailable`].
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}
