//! The page request the engine composes a response for.

use super::{CookieJar, Headers, Method, cookies::Cookie};

/// The inbound request for the page being composed.
///
/// Built by the embedding framework's adapter from whatever its native
/// request type is; the engine only needs the method, the path and query
/// string, the headers, and the cookie jar.
///
/// # Examples
///
/// ```
/// use resi::http::PageRequest;
///
/// let page = PageRequest::get("/articles/?page=2")
///     .header("Host", "example.com");
///
/// assert_eq!(page.path(), "/articles/");
/// assert_eq!(page.query_string(), Some("page=2"));
/// assert_eq!(page.full_path(), "/articles/?page=2");
/// assert_eq!(page.absolute_uri(), "http://example.com/articles/?page=2");
/// ```
#[derive(Debug, Clone)]
pub struct PageRequest {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Headers,
    cookies: CookieJar,
}

impl PageRequest {
    /// Host used for [`absolute_uri`](Self::absolute_uri) when the request
    /// carries no `Host` header. In-process requests have no TCP peer, so a
    /// stable synthetic name stands in.
    const DEFAULT_HOST: &'static str = "localserver";

    /// Creates a GET request for `url`, splitting any `?query` suffix off
    /// the path.
    pub fn get(url: impl AsRef<str>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Creates a request with the given method and URL.
    pub fn new(method: Method, url: impl AsRef<str>) -> Self {
        let url = url.as_ref();
        let (path, query) = match url.find('?') {
            Some(pos) => (url[..pos].to_owned(), Some(url[pos + 1..].to_owned())),
            None => (url.to_owned(), None),
        };
        Self {
            method,
            path,
            query,
            headers: Headers::new(),
            cookies: CookieJar::new(),
        }
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Adds a cookie to the request's jar.
    #[must_use]
    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.set(cookie);
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request's cookie jar.
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Returns the path including the query string, e.g. `/articles/?page=2`.
    ///
    /// This is the composed-page cache key component: two requests with the
    /// same full path reassemble the same cached page.
    pub fn full_path(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Returns the absolute URI of this request, used as the synthetic
    /// `Referer` on fragment sub-requests.
    ///
    /// The host comes from the `Host` header when present, falling back to
    /// `localserver`.
    pub fn absolute_uri(&self) -> String {
        let host = self.headers.get("host").unwrap_or(Self::DEFAULT_HOST);
        format!("http://{}{}", host, self.full_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_query_string() {
        let page = PageRequest::get("/search?q=rust&page=2");
        assert_eq!(page.path(), "/search");
        assert_eq!(page.query_string(), Some("q=rust&page=2"));
        assert_eq!(page.full_path(), "/search?q=rust&page=2");
    }

    #[test]
    fn no_query_string() {
        let page = PageRequest::get("/hello/");
        assert_eq!(page.path(), "/hello/");
        assert_eq!(page.query_string(), None);
        assert_eq!(page.full_path(), "/hello/");
    }

    #[test]
    fn absolute_uri_uses_host_header() {
        let page = PageRequest::get("/a/?x=1").header("Host", "example.com");
        assert_eq!(page.absolute_uri(), "http://example.com/a/?x=1");
    }

    #[test]
    fn absolute_uri_falls_back_to_local_host() {
        let page = PageRequest::get("/a/");
        assert_eq!(page.absolute_uri(), "http://localserver/a/");
    }

    #[test]
    fn cookies_travel_with_the_request() {
        let page = PageRequest::get("/").cookie(Cookie::new("session", "s1"));
        assert_eq!(page.cookies().get("session").unwrap().value, "s1");
    }
}
