//! Error types for the session layer.

use std::fmt;

use sesskit_store::StoreError;

/// The store operation a persistence failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    /// Saving a session at the end of a request.
    Set,
    /// Destroying a cleared session at the end of a request.
    Destroy,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set => f.write_str("set"),
            Self::Destroy => f.write_str("destroy"),
        }
    }
}

/// Errors that can occur while coordinating a request's session.
///
/// Where an error surfaces depends on the phase:
///
/// - While acquiring ([`begin`](crate::SessionCoordinator::begin)),
///   errors are returned straight to the caller. The request has no
///   usable session.
/// - While finalizing ([`end`](crate::SessionCoordinator::end)), store
///   failures are wrapped in [`SessionError::Persistence`] and handed to
///   the configured [`ErrorHandler`](crate::ErrorHandler) first.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The store failed or is unavailable while loading a session.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Saving or destroying a session failed after the handler ran.
    #[error("sesskit {operation} error: {source}")]
    Persistence {
        operation: StoreOperation,
        #[source]
        source: StoreError,
    },

    /// A session could not be converted to JSON for fingerprinting.
    #[error("session could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A session operation was requested on a request that has no
    /// session (its path is outside the cookie scope).
    #[error("no session is active for this request")]
    Inactive,
}

impl SessionError {
    /// Returns `true` if the root cause is an unavailable store.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Store(e) | Self::Persistence { source: e, .. } => e.is_unavailable(),
            _ => false,
        }
    }

    /// The failed operation, for persistence failures.
    pub fn operation(&self) -> Option<StoreOperation> {
        match self {
            Self::Persistence { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}
