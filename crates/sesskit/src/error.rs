//! Unified error type for sesskit.

use sesskit_session::SessionError;
use sesskit_store::StoreError;

use crate::SettingsError;

/// Top-level error wrapping every layer's errors.
///
/// `#[from]` on each variant lets `?` convert layer errors
/// automatically, so host code only has to name this one type.
#[derive(Debug, thiserror::Error)]
pub enum SesskitError {
    /// A store-level error (backing client, serialization, availability).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A session-level error (acquire, persist, regenerate).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Settings could not be loaded or are invalid.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl SesskitError {
    /// Returns `true` if the root cause is an unavailable store.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_unavailable(),
            Self::Session(e) => e.is_unavailable(),
            Self::Settings(_) => false,
        }
    }
}
