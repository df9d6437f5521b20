//! Declarative session settings.
//!
//! Everything in [`SessionConfig`] that is plain data can also come from
//! a JSON file and the environment. Hooks (id generator, validator, ...)
//! stay code-only and are added on the builder afterwards:
//!
//! ```text
//! sessions.json ──→ SessionSettings ──(SESSKIT_* env)──→ validate()
//!                                                          │
//!                                                          ▼
//!                             into_builder() ──→ .valid(..) ──→ .build(client)
//! ```
//!
//! Durations are written in milliseconds. Every field has a default, so
//! `{}` is a valid file.

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sesskit_session::{SessionConfig, SessionCoordinatorBuilder};
use sesskit_store::{CookieOptions, HealthMonitor, StoreOptions};
use tracing::debug;

/// Errors from loading or validating [`SessionSettings`].
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file couldn't be read.
    #[error("failed to read settings: {0}")]
    Io(#[from] io::Error),

    /// The settings file isn't valid JSON for [`SessionSettings`].
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range, or an environment override is malformed.
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Environment variable overriding [`SessionSettings::key`].
pub const ENV_KEY: &str = "SESSKIT_KEY";
/// Environment variable overriding [`SessionSettings::prefix`].
pub const ENV_PREFIX: &str = "SESSKIT_PREFIX";
/// Environment variable overriding [`SessionSettings::ttl_ms`].
pub const ENV_TTL_MS: &str = "SESSKIT_TTL_MS";
/// Environment variable overriding [`SessionSettings::reconnect_timeout_ms`].
pub const ENV_RECONNECT_TIMEOUT_MS: &str = "SESSKIT_RECONNECT_TIMEOUT_MS";

/// The data half of a session setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
    /// Session id cookie name.
    pub key: String,

    /// Store key prefix.
    pub prefix: String,

    /// Fixed store TTL in milliseconds. Absent or zero: derive from the
    /// session cookie.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,

    /// Reconnect window in milliseconds.
    pub reconnect_timeout_ms: u64,

    /// Re-save and re-issue the cookie on every request.
    pub rolling: bool,

    /// Persist new sessions even when the handler left them untouched.
    pub allow_empty_new_session: bool,

    /// Cookie defaults for new sessions.
    pub cookie: CookieOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let store = StoreOptions::default();
        Self {
            key: SessionConfig::DEFAULT_KEY.to_string(),
            prefix: store.prefix,
            ttl_ms: None,
            reconnect_timeout_ms: HealthMonitor::DEFAULT_RECONNECT_TIMEOUT.as_millis()
                as u64,
            rolling: false,
            allow_empty_new_session: false,
            cookie: CookieOptions::default(),
        }
    }
}

impl SessionSettings {
    /// Reads settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "session settings loaded");
        Self::from_json(&text)
    }

    /// Parses settings from a JSON string.
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    /// File, then environment overrides, then validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings = Self::from_file(path)?.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Applies `SESSKIT_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, SettingsError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Applies `SESSKIT_*` overrides read through `lookup`.
    ///
    /// # Errors
    /// [`SettingsError::Invalid`] if a millisecond override isn't a
    /// non-negative integer.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_KEY) {
            self.key = key;
        }
        if let Some(prefix) = lookup(ENV_PREFIX) {
            self.prefix = prefix;
        }
        if let Some(raw) = lookup(ENV_TTL_MS) {
            self.ttl_ms = Some(parse_millis(ENV_TTL_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_RECONNECT_TIMEOUT_MS) {
            self.reconnect_timeout_ms = parse_millis(ENV_RECONNECT_TIMEOUT_MS, &raw)?;
        }
        Ok(self)
    }

    /// Rejects settings no coordinator can work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.key.trim().is_empty() {
            return Err(SettingsError::Invalid("key must not be empty".into()));
        }
        if self.reconnect_timeout_ms == 0 {
            return Err(SettingsError::Invalid(
                "reconnectTimeoutMs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// The fixed TTL, if one is configured.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    /// How long a request waits for the store to reconnect.
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    /// Adapter options: prefix, fixed TTL and reconnect window.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            prefix: self.prefix.clone(),
            ttl: self.ttl(),
            reconnect_timeout: self.reconnect_timeout(),
        }
    }

    /// A [`SessionConfig`] with these values and default hooks.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            key: self.key.clone(),
            cookie: self.cookie.clone(),
            rolling: self.rolling,
            allow_empty_new_session: self.allow_empty_new_session,
            ..SessionConfig::default()
        }
    }

    /// A coordinator builder preloaded with these settings.
    pub fn into_builder(self) -> SessionCoordinatorBuilder {
        SessionCoordinatorBuilder::new()
            .store_options(self.store_options())
            .config(self.session_config())
    }
}

fn parse_millis(name: &str, raw: &str) -> Result<u64, SettingsError> {
    raw.trim()
        .parse()
        .map_err(|_| SettingsError::Invalid(format!("{name} must be milliseconds, got {raw:?}")))
}
