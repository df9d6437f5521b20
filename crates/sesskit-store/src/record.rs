//! The session data model and its stored form.
//!
//! A [`Session`] is a JSON-like map of caller data that always carries a
//! `cookie` sub-object ([`CookieOptions`]). The same struct is what gets
//! serialized into the backing store, so "the record" and "the session"
//! share one serde definition:
//!
//! ```json
//! {
//!   "cookie": { "httpOnly": true, "path": "/", "overwrite": true,
//!               "signed": true, "maxAge": 86400000 },
//!   "count": 1
//! }
//! ```
//!
//! `cookie.expires` is written as an RFC 3339 timestamp string and parsed
//! back into a `DateTime<Utc>` on read, so callers always get a real
//! absolute time rather than a string.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Name of the reserved sub-object holding cookie options.
pub const COOKIE_KEY: &str = "cookie";

/// One day, in milliseconds.
const DEFAULT_MAX_AGE_MS: u64 = 24 * 60 * 60 * 1000;

// ---------------------------------------------------------------------------
// CookieOptions
// ---------------------------------------------------------------------------

/// Cookie attributes carried inside every session.
///
/// These double as the attributes used when the session id is written
/// back to the client, and as the input to TTL derivation
/// (see [`derive_ttl`](crate::derive_ttl)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CookieOptions {
    /// Hide the cookie from client-side scripts.
    pub http_only: bool,

    /// Path scope. Requests outside it get no session at all.
    pub path: String,

    /// Replace a previously set cookie of the same name in the response.
    pub overwrite: bool,

    /// Ask the host to sign the cookie value.
    pub signed: bool,

    /// Relative lifetime in milliseconds.
    ///
    /// Stored records with a non-numeric value read back as `None`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_max_age"
    )]
    pub max_age: Option<u64>,

    /// Absolute expiry. Takes precedence over `max_age` for TTL purposes.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_expires"
    )]
    pub expires: Option<DateTime<Utc>>,

    /// Any extra attributes the caller attached (domain, sameSite, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            path: "/".to_string(),
            overwrite: true,
            signed: true,
            max_age: Some(DEFAULT_MAX_AGE_MS),
            expires: None,
            extra: Map::new(),
        }
    }
}

impl CookieOptions {
    /// The path scope, treating an empty path as `/`.
    pub fn scope(&self) -> &str {
        if self.path.is_empty() { "/" } else { &self.path }
    }
}

fn lenient_max_age<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.ceil() as u64)
        }),
        _ => None,
    })
}

fn lenient_expires<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Some(Value::Number(n)) => {
            n.as_i64().and_then(DateTime::from_timestamp_millis)
        }
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Request-scoped state round-tripped through a store between requests.
///
/// The caller's data lives in a flat string-keyed map next to the
/// reserved [`cookie`](Self::cookie) field. Keys are kept sorted so two
/// sessions with the same content serialize to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Cookie options for this session. Starts as the configured defaults.
    #[serde(default)]
    pub cookie: CookieOptions,

    #[serde(flatten)]
    data: Map<String, Value>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(CookieOptions::default())
    }
}

impl Session {
    /// Creates an empty session carrying the given cookie options.
    pub fn new(cookie: CookieOptions) -> Self {
        Self {
            cookie,
            data: Map::new(),
        }
    }

    /// Rebuilds a session from its stored record.
    ///
    /// A record without a `cookie` object gets [`CookieOptions::default`].
    pub fn from_record(record: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(record)
    }

    /// Rebuilds a session, filling a missing `cookie` object with
    /// `cookie` instead of the built-in defaults.
    pub fn from_record_with_cookie(
        mut record: Value,
        cookie: &CookieOptions,
    ) -> Result<Self, serde_json::Error> {
        if let Value::Object(map) = &mut record {
            if !map.contains_key(COOKIE_KEY) {
                map.insert(COOKIE_KEY.to_string(), serde_json::to_value(cookie)?);
            }
        }
        Self::from_record(record)
    }

    /// Serializes the session into its stored record.
    pub fn to_record(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Returns the raw value stored under `key`.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Returns the value under `key` deserialized as `T`.
    ///
    /// `None` if the key is missing or holds something that isn't a `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Stores `value` under `key`, returning the previous value.
    ///
    /// Writing to [`COOKIE_KEY`] replaces the cookie options instead of
    /// adding a data entry.
    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<Value>, serde_json::Error> {
        let key = key.into();
        let value = serde_json::to_value(value)?;
        if key == COOKIE_KEY {
            let previous = serde_json::to_value(&self.cookie)?;
            self.cookie = serde_json::from_value(value)?;
            return Ok(Some(previous));
        }
        Ok(self.data.insert(key, value))
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Returns `true` if `key` holds a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns `true` when no caller data is stored. Cookie options
    /// don't count.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read access to the caller data.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}
