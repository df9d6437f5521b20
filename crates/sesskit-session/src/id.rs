//! Session ids and how they travel between client and server.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sesskit_store::{CookieOptions, Session};

use crate::RequestContext;

/// Random bytes behind a generated session id.
pub const SESSION_ID_BYTES: usize = 24;

/// Generates a URL-safe session id from `len` random bytes.
///
/// 24 bytes (the default) is 192 bits of entropy, encoded as 32
/// characters of unpadded base64url.
pub fn generate_sid(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(bytes.as_mut_slice());
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Reads and writes the correlation token carrying the session id.
///
/// The default, [`CookieIdStore`], uses a cookie. Hosts that carry the
/// id elsewhere (a header, a URL segment) plug in their own.
pub trait SessionIdStore: Send + Sync {
    /// The inbound session id, if the client sent one.
    fn get(&self, ctx: &dyn RequestContext) -> Option<String>;

    /// Issues `sid` to the client.
    fn set(&self, ctx: &mut dyn RequestContext, sid: &str, session: &Session);

    /// Tells the client to forget its session id.
    fn reset(&self, ctx: &mut dyn RequestContext);
}

/// Carries the session id in a cookie named `key`.
#[derive(Debug, Clone)]
pub struct CookieIdStore {
    key: String,
    cookie: CookieOptions,
}

impl CookieIdStore {
    /// `cookie` supplies the attributes used when clearing the cookie.
    /// Issued cookies use the session's own cookie options.
    pub fn new(key: impl Into<String>, cookie: CookieOptions) -> Self {
        Self {
            key: key.into(),
            cookie,
        }
    }

    /// The cookie name.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl SessionIdStore for CookieIdStore {
    fn get(&self, ctx: &dyn RequestContext) -> Option<String> {
        ctx.cookie(&self.key).filter(|sid| !sid.is_empty())
    }

    fn set(&self, ctx: &mut dyn RequestContext, sid: &str, session: &Session) {
        ctx.set_cookie(&self.key, sid, &session.cookie);
    }

    fn reset(&self, ctx: &mut dyn RequestContext) {
        ctx.clear_cookie(&self.key, &self.cookie);
    }
}
