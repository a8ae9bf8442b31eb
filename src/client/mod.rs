//! In-process fragment fetching.
//!
//! A fragment fetch is a full request/response round trip that never
//! touches a network socket: the engine builds a [`SubRequest`] that looks
//! like an external client hitting the same application and hands it to
//! the embedding framework through the [`Dispatcher`] trait. The adapter
//! is the only thing the engine knows about routing — it resolves a URL to
//! a response however the host framework pleases.
//!
//! ## Core types
//!
//! - [`Dispatcher`] — boundary trait the embedding framework implements.
//! - [`SubRequest`] — the structured request handed to the dispatcher.
//! - [`FragmentClient`] — builds sub-requests with forwarded cookies and a
//!   synthetic `Referer`, with an optional bounded fetch time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::http::{CookieJar, Headers, Method, PageRequest, PageResponse};

/// Error reported by a [`Dispatcher`] when it cannot produce a response.
///
/// Deliberately opaque: the engine treats every dispatch failure the same
/// way (fragment-fetch failure policy), so adapters just describe what
/// happened.
#[derive(Debug, Error)]
#[error("dispatch failed: {message}")]
pub struct DispatchError {
    message: String,
}

impl DispatchError {
    /// Creates a dispatch error with a human-readable description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors from one fragment fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("fragment fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// An in-process request issued to the embedding framework.
///
/// Fields are public: this is the wire between the engine and the
/// adapter, not an abstraction over it.
#[derive(Debug, Clone)]
pub struct SubRequest {
    /// HTTP method — always `GET` for fragment fetches.
    pub method: Method,
    /// Request path without the query string.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Request headers.
    pub headers: Headers,
    /// Cookies forwarded from the page request.
    pub cookies: CookieJar,
    /// Request body — empty for fragment fetches.
    pub body: Bytes,
}

impl SubRequest {
    /// Creates a GET sub-request for `url`, splitting any `?query` suffix
    /// off the path.
    pub fn get(url: &str) -> Self {
        let (path, query) = match url.find('?') {
            Some(pos) => (url[..pos].to_owned(), Some(url[pos + 1..].to_owned())),
            None => (url.to_owned(), None),
        };
        Self {
            method: Method::Get,
            path,
            query,
            headers: Headers::new(),
            cookies: CookieJar::new(),
            body: Bytes::new(),
        }
    }

    /// Returns the path including the query string.
    pub fn full_path(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// The boundary adapter to the outer web framework.
///
/// Implementations resolve a [`SubRequest`] to a [`PageResponse`] through
/// whatever dispatch machinery the host has — a router, a handler table, a
/// test fixture. Must be `Send + Sync`: one adapter instance is shared
/// across every request the engine composes.
///
/// # Examples
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use resi::client::{DispatchError, Dispatcher, SubRequest};
/// use resi::http::PageResponse;
///
/// struct StaticPages;
///
/// #[async_trait]
/// impl Dispatcher for StaticPages {
///     async fn dispatch(&self, request: SubRequest) -> Result<PageResponse, DispatchError> {
///         match request.path.as_str() {
///             "/hello/" => Ok(PageResponse::ok().body("Hello World!")),
///             _ => Ok(PageResponse::new(404)),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Resolves `request` to a response.
    ///
    /// A handler that runs but produces an error *page* should return that
    /// page as a response with its real status code, not an `Err` — the
    /// engine's fragment policy needs the status. `Err` means the dispatch
    /// machinery itself failed.
    async fn dispatch(&self, request: SubRequest) -> Result<PageResponse, DispatchError>;
}

/// Issues fragment fetches through a [`Dispatcher`].
///
/// Every fetch mimics the original client: the page request's cookies are
/// forwarded, `Referer` is set to the composing page's absolute URL, and
/// an `X-Esi-Fragment: true` header lets downstream handlers distinguish
/// fragment fetches from top-level requests.
pub struct FragmentClient<D> {
    dispatcher: Arc<D>,
    timeout: Option<Duration>,
}

impl<D: Dispatcher> FragmentClient<D> {
    /// Creates a client over the given dispatcher, with no fetch timeout.
    pub fn new(dispatcher: Arc<D>) -> Self {
        Self {
            dispatcher,
            timeout: None,
        }
    }

    /// Bounds each fetch to `timeout`; an exceeded bound is a
    /// [`FetchError::Timeout`].
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fetches `url` as a fragment of `page`.
    ///
    /// Non-200 fragment statuses are not errors here; the response is
    /// returned as-is and the caller applies the error-fragment policy.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Dispatch`] — the dispatch machinery failed.
    /// - [`FetchError::Timeout`] — the configured fetch bound was exceeded.
    pub async fn fetch(&self, url: &str, page: &PageRequest) -> Result<PageResponse, FetchError> {
        let mut request = SubRequest::get(url);
        request.headers.append("Referer", page.absolute_uri());
        request.headers.append("X-Esi-Fragment", "true");
        request.cookies = page.cookies().clone();

        tracing::debug!(fragment = %request.full_path(), page = %page.full_path(), "fetching fragment");

        let response = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.dispatcher.dispatch(request)).await {
                    Ok(result) => result?,
                    Err(_) => return Err(FetchError::Timeout(limit)),
                }
            }
            None => self.dispatcher.dispatch(request).await?,
        };

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Echoes request metadata back so tests can see what the client sent.
    struct EchoDispatcher;

    #[async_trait]
    impl Dispatcher for EchoDispatcher {
        async fn dispatch(&self, request: SubRequest) -> Result<PageResponse, DispatchError> {
            let referer = request.headers.get("Referer").unwrap_or("").to_owned();
            let flag = request.headers.get("X-Esi-Fragment").unwrap_or("").to_owned();
            let cookie = request
                .cookies
                .get("session")
                .map(|c| c.value.clone())
                .unwrap_or_default();
            Ok(PageResponse::ok().body(format!("{};{};{};{}", request.full_path(), referer, flag, cookie)))
        }
    }

    struct SlowDispatcher;

    #[async_trait]
    impl Dispatcher for SlowDispatcher {
        async fn dispatch(&self, _request: SubRequest) -> Result<PageResponse, DispatchError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(PageResponse::ok())
        }
    }

    struct BrokenDispatcher;

    #[async_trait]
    impl Dispatcher for BrokenDispatcher {
        async fn dispatch(&self, _request: SubRequest) -> Result<PageResponse, DispatchError> {
            Err(DispatchError::new("no handler table"))
        }
    }

    fn page() -> PageRequest {
        PageRequest::get("/page/?v=1")
            .header("Host", "example.com")
            .cookie(crate::http::Cookie::new("session", "s1"))
    }

    #[tokio::test]
    async fn forwards_referer_flag_and_cookies() {
        let client = FragmentClient::new(Arc::new(EchoDispatcher));
        let response = client.fetch("/frag/?a=b", &page()).await.unwrap();
        assert_eq!(
            response.content(),
            "/frag/?a=b;http://example.com/page/?v=1;true;s1".as_bytes()
        );
    }

    #[tokio::test]
    async fn timeout_maps_to_fetch_error() {
        let client =
            FragmentClient::new(Arc::new(SlowDispatcher)).with_timeout(Duration::from_millis(10));
        let result = client.fetch("/slow/", &page()).await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }

    #[tokio::test]
    async fn dispatch_error_propagates() {
        let client = FragmentClient::new(Arc::new(BrokenDispatcher));
        let result = client.fetch("/frag/", &page()).await;
        assert!(matches!(result, Err(FetchError::Dispatch(_))));
    }

    #[test]
    fn sub_request_splits_query() {
        let request = SubRequest::get("/a/b?x=1&y=2");
        assert_eq!(request.path, "/a/b");
        assert_eq!(request.query.as_deref(), Some("x=1&y=2"));
        assert_eq!(request.full_path(), "/a/b?x=1&y=2");
    }
}
