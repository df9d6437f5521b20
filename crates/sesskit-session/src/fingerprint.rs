//! Content fingerprints for change detection.
//!
//! A fingerprint is a SHA-256 digest of a session's JSON form with object
//! keys visited in sorted order, so it depends only on content, never on
//! insertion order or map implementation. It is used purely to answer
//! "did this session change?", not for security.

use std::fmt;

use serde_json::Value;
use sesskit_store::Session;
use sha2::{Digest, Sha256};

/// Digest of a session's content, including its cookie options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Fingerprints `session`.
pub fn fingerprint(session: &Session) -> Result<Fingerprint, serde_json::Error> {
    let record = session.to_record()?;
    let mut hasher = Sha256::new();
    feed(&record, &mut hasher);
    Ok(Fingerprint(hasher.finalize().into()))
}

fn feed(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(Value::String(key.clone()).to_string().as_bytes());
                hasher.update(b":");
                feed(&map[key.as_str()], hasher);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                feed(item, hasher);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        scalar => hasher.update(scalar.to_string().as_bytes()),
    }
}
