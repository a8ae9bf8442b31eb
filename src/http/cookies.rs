//! Cookie values and an order-preserving cookie jar.
//!
//! The jar keeps cookies in insertion order because fragment cookies are
//! folded into the page response in marker-encounter order. Merge identity
//! is the `(name, path, domain)` triple: cookies that differ in path or
//! domain coexist even under the same name.

use serde::{Deserialize, Serialize};

/// An HTTP cookie with the attributes that survive fragment merging.
///
/// Attribute fields beyond `name`/`value` travel with the cookie through
/// the merge so a fragment can scope its cookies (`path`, `domain`) or
/// control their lifetime (`expires`, `max_age`).
///
/// # Examples
///
/// ```
/// use resi::http::Cookie;
///
/// let cookie = Cookie::new("session", "abc123")
///     .path("/app/")
///     .http_only();
/// assert_eq!(cookie.name, "session");
/// assert_eq!(cookie.path.as_deref(), Some("/app/"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// `Path` attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// `Domain` attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// `Expires` attribute, as an HTTP-date string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    /// `Max-Age` attribute in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i64>,
    /// `Secure` attribute.
    #[serde(default)]
    pub secure: bool,
    /// `HttpOnly` attribute.
    #[serde(default)]
    pub http_only: bool,
}

impl Cookie {
    /// Creates a cookie with just a name and value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            expires: None,
            max_age: None,
            secure: false,
            http_only: false,
        }
    }

    /// Sets the `Path` attribute.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the `Domain` attribute.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets the `Expires` attribute from an HTTP-date string.
    #[must_use]
    pub fn expires(mut self, expires: impl Into<String>) -> Self {
        self.expires = Some(expires.into());
        self
    }

    /// Sets the `Max-Age` attribute.
    #[must_use]
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Sets the `Secure` attribute.
    #[must_use]
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Sets the `HttpOnly` attribute.
    #[must_use]
    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    // Merge identity: two cookies are "the same cookie" iff name, path, and
    // domain all match.
    fn same_identity(&self, other: &Cookie) -> bool {
        self.name == other.name && self.path == other.path && self.domain == other.domain
    }
}

/// An insertion-ordered collection of cookies keyed by `(name, path, domain)`.
///
/// Setting a cookie whose identity already exists replaces it in place, so a
/// later writer wins without disturbing the jar's order. This is the
/// behavior the cookie-merge fold in [`crate::merge`] relies on: fragments
/// are folded first, the page response last, and the page's cookies
/// overwrite same-identity fragment cookies.
///
/// # Examples
///
/// ```
/// use resi::http::{Cookie, CookieJar};
///
/// let mut jar = CookieJar::new();
/// jar.set(Cookie::new("a", "apple"));
/// jar.set(Cookie::new("a", "alligator"));
/// assert_eq!(jar.get("a").unwrap().value, "alligator");
/// assert_eq!(jar.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieJar {
    inner: Vec<Cookie>,
}

impl CookieJar {
    /// Creates an empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a cookie, replacing any existing cookie with the same
    /// `(name, path, domain)` identity in place.
    pub fn set(&mut self, cookie: Cookie) {
        match self.inner.iter_mut().find(|c| c.same_identity(&cookie)) {
            Some(existing) => *existing = cookie,
            None => self.inner.push(cookie),
        }
    }

    /// Returns the first cookie with the given name, or `None`.
    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.inner.iter().find(|c| c.name == name)
    }

    /// Returns an iterator over all cookies with the given name.
    ///
    /// More than one can exist when the same name is scoped to distinct
    /// paths or domains.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Cookie> + 'a {
        self.inner.iter().filter(move |c| c.name == name)
    }

    /// Folds every cookie of `other` into this jar, in `other`'s order.
    ///
    /// `other`'s cookies win on identity collision.
    pub fn extend(&mut self, other: CookieJar) {
        for cookie in other.inner {
            self.set(cookie);
        }
    }

    /// Returns the number of cookies in the jar.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the jar holds no cookies.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over the cookies in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.inner.iter()
    }
}
