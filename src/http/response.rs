//! Response values for pages and fragments.
//!
//! One response type serves both roles: a fragment is itself a full
//! request/response round trip, and the page response must stay a plain
//! value so it can be rebuilt from cache.

use bytes::Bytes;

use super::{CookieJar, Headers, cookies::Cookie};

/// An HTTP response as the engine sees it: status, headers, body bytes,
/// and a cookie jar.
///
/// Statuses are plain `u16` because fragment statuses are forwarded
/// verbatim, never matched exhaustively.
///
/// # Examples
///
/// ```
/// use resi::http::PageResponse;
///
/// let response = PageResponse::ok()
///     .header("Vary", "Cookie")
///     .body("<p>hello</p>");
///
/// assert_eq!(response.status(), 200);
/// assert_eq!(response.content(), "<p>hello</p>".as_bytes());
/// ```
#[derive(Debug, Clone)]
pub struct PageResponse {
    status: u16,
    headers: Headers,
    body: Bytes,
    cookies: CookieJar,
}

impl PageResponse {
    /// Creates a response with the given status and an empty body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            cookies: CookieJar::new(),
        }
    }

    /// Creates an empty `200 OK` response.
    pub fn ok() -> Self {
        Self::new(200)
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Appends a header in-place. Intended for pipelines that receive a
    /// response from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Adds a cookie to the response's jar.
    #[must_use]
    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.set(cookie);
        self
    }

    /// Returns the status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns `true` for a `200 OK` status.
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response headers for in-place modification.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the body bytes.
    pub fn content(&self) -> &Bytes {
        &self.body
    }

    /// Replaces the body bytes in place.
    pub fn set_content(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Returns the response's cookie jar.
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Returns the response's cookie jar for in-place modification.
    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }
}

impl Default for PageResponse {
    fn default() -> Self {
        Self::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_roundtrip() {
        let r = PageResponse::new(404)
            .header("X-Request-Id", "abc-123")
            .body("missing");
        assert_eq!(r.status(), 404);
        assert!(!r.is_ok());
        assert_eq!(r.headers().get("x-request-id"), Some("abc-123"));
        assert_eq!(r.content(), "missing".as_bytes());
    }

    #[test]
    fn set_content_replaces_body() {
        let mut r = PageResponse::ok().body("before");
        r.set_content(Bytes::from_static(b"after"));
        assert_eq!(r.content(), "after".as_bytes());
    }

    #[test]
    fn cookies_accumulate() {
        let r = PageResponse::ok()
            .cookie(Cookie::new("a", "apple"))
            .cookie(Cookie::new("b", "banana"));
        assert_eq!(r.cookies().len(), 2);
    }
}
