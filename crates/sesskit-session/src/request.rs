//! The seam between sesskit and whatever serves HTTP.
//!
//! sesskit never parses requests or writes responses itself. The host
//! framework implements [`RequestContext`] for its own request type and
//! sesskit reads the path, reads the inbound session cookie, and queues
//! outbound cookies through it.
//!
//! [`BasicRequest`] is a plain in-memory implementation, handy for tests,
//! demos, and hosts that collect cookies into their own response later.

use std::collections::HashMap;

use sesskit_store::CookieOptions;

/// Per-request access to the host's request and response.
///
/// # Trait bounds
///
/// `Send + Sync` so a `&mut dyn RequestContext` can be held across
/// `.await` points on a multi-threaded runtime.
pub trait RequestContext: Send + Sync {
    /// The request path, without the query string.
    fn path(&self) -> &str;

    /// A query-string parameter.
    fn query(&self, name: &str) -> Option<&str> {
        let _ = name;
        None
    }

    /// The value of an inbound cookie.
    fn cookie(&self, name: &str) -> Option<String>;

    /// Queues an outbound cookie carrying `value`.
    fn set_cookie(&mut self, name: &str, value: &str, options: &CookieOptions);

    /// Queues an outbound cookie that clears `name` on the client.
    fn clear_cookie(&mut self, name: &str, options: &CookieOptions);

    /// A session id the host wants to force for this request.
    ///
    /// Takes precedence over the inbound cookie.
    fn requested_session_id(&self) -> Option<&str> {
        None
    }
}

/// A cookie queued for the response.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCookie {
    /// Cookie name.
    pub name: String,
    /// New value, or `None` when the cookie is being cleared.
    pub value: Option<String>,
    /// Attributes to send with it.
    pub options: CookieOptions,
}

/// An in-memory [`RequestContext`].
///
/// Query strings are split on `&` and `=` without percent-decoding.
#[derive(Debug, Clone, Default)]
pub struct BasicRequest {
    path: String,
    query: HashMap<String, String>,
    cookies: HashMap<String, String>,
    requested_session_id: Option<String>,
    outbound: Vec<OutboundCookie>,
}

impl BasicRequest {
    /// Creates a request for `target` (`"/path?a=1&b=2"`).
    pub fn new(target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();

        Self {
            path: path.to_string(),
            query,
            ..Self::default()
        }
    }

    /// Adds an inbound cookie.
    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    /// Forces the session id used for this request.
    pub fn force_session_id(&mut self, id: impl Into<String>) {
        self.requested_session_id = Some(id.into());
    }

    /// Every cookie queued so far, in order.
    pub fn outbound(&self) -> &[OutboundCookie] {
        &self.outbound
    }

    /// The last cookie queued under `name`.
    pub fn outbound_cookie(&self, name: &str) -> Option<&OutboundCookie> {
        self.outbound.iter().rev().find(|c| c.name == name)
    }

    /// The value the client will hold for `name` after this response,
    /// if the response changes it. `Some(None)` means "cleared".
    pub fn issued(&self, name: &str) -> Option<Option<&str>> {
        self.outbound_cookie(name).map(|c| c.value.as_deref())
    }
}

impl RequestContext for BasicRequest {
    fn path(&self) -> &str {
        &self.path
    }

    fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.get(name).cloned()
    }

    fn set_cookie(&mut self, name: &str, value: &str, options: &CookieOptions) {
        self.outbound.push(OutboundCookie {
            name: name.to_string(),
            value: Some(value.to_string()),
            options: options.clone(),
        });
    }

    fn clear_cookie(&mut self, name: &str, options: &CookieOptions) {
        self.outbound.push(OutboundCookie {
            name: name.to_string(),
            value: None,
            options: options.clone(),
        });
    }

    fn requested_session_id(&self) -> Option<&str> {
        self.requested_session_id.as_deref()
    }
}
