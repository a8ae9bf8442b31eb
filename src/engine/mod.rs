//! Fragment resolution engine — orchestration of scanning, fetching,
//! splicing, merging, and caching for one response.
//!
//! ## Core types
//!
//! - [`UsageTracker`] — per-request record of whether and which fragment
//!   URLs were emitted while the page rendered.
//! - [`EsiEngine`] — the engine itself, built over a [`Dispatcher`] and a
//!   [`CacheStore`] plus an [`EngineConfig`].
//!
//! The engine is a plain value with injected collaborators — no ambient
//! globals. One instance serves every request; per-request state lives
//! entirely in the [`UsageTracker`] owned by that request.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::cache::{self, CacheStore, FragmentDescriptor, PageEntry, ScanEntry};
use crate::client::{Dispatcher, FragmentClient};
use crate::compress::{self, CompressionError};
use crate::http::{CookieJar, Headers, PageRequest, PageResponse};
use crate::markers::{self, IncludeMarker};
use crate::merge;

/// Configuration problems detected at engine construction.
///
/// Surfaced once at startup instead of failing per-render.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("fragment timeout must be greater than zero")]
    ZeroFragmentTimeout,
}

/// Errors that abort composing one response.
///
/// Everything else the engine encounters — fetch failures, merge
/// failures, cache store failures — is recovered locally and at most
/// logged; only these are worth failing the page for.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),

    /// A supposedly-gzipped body failed to decode (or re-encode).
    /// Fatal for the response: returning unspliced compressed content
    /// would corrupt the page.
    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// When `true`, fragments are fetched even for non-200 page responses,
    /// and non-200 *fragment* content is spliced in verbatim instead of
    /// being suppressed. Off by default: error pages get empty fragments
    /// and error fragments become empty content.
    pub process_errors: bool,

    /// Upper bound on each fragment fetch. `None` leaves fetches unbounded
    /// (the host's own dispatch timeout still applies, if any).
    pub fragment_timeout: Option<Duration>,

    /// Memoize marker scans of unknown-status bodies by content hash, so
    /// identical bodies are scanned once. On by default.
    pub memoize_scans: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            process_errors: false,
            fragment_timeout: None,
            memoize_scans: true,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroFragmentTimeout`] if a zero timeout was set — it
    /// would fail every fetch on arrival.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fragment_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroFragmentTimeout);
        }
        Ok(())
    }
}

/// Lifecycle of one request's fragment usage.
///
/// ```text
/// Unmarked ──record()──▶ Pending ──resolve──▶ Resolved
/// MarkedUnused ──record()──▶ Pending
/// MarkedUnused ──resolve──▶ Resolved
/// ```
///
/// `Resolved` is terminal; the tracker is consumed by
/// [`EsiEngine::resolve`] and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageState {
    /// Usage status unknown — the response did not go through tracked
    /// rendering; resolution falls back to a body scan.
    Unmarked,
    /// Tracked, and no fragment URL has been recorded yet.
    MarkedUnused,
    /// At least one fragment URL was recorded; resolution pending.
    Pending,
    /// Resolution ran. Terminal.
    Resolved,
}

/// Per-request record of the fragment URLs emitted during rendering.
///
/// Create one at request start and thread it through rendering; the
/// template layer calls [`render_marker`](Self::render_marker) for every
/// include it emits. The engine consumes the tracker during response
/// composition. Exclusively owned by its request — never shared.
///
/// # Examples
///
/// ```
/// use resi::engine::{UsageState, UsageTracker};
///
/// let mut tracker = UsageTracker::new();
/// assert_eq!(tracker.state(), UsageState::MarkedUnused);
///
/// let tag = tracker.render_marker("/hello/7/");
/// assert_eq!(tag, "<esi:include src=\"/hello/7/\" />");
/// assert_eq!(tracker.state(), UsageState::Pending);
/// ```
#[derive(Debug, Clone)]
pub struct UsageTracker {
    state: UsageState,
    recorded: Vec<String>,
}

impl UsageTracker {
    /// Creates a tracker for a request whose rendering is tracked.
    pub fn new() -> Self {
        Self {
            state: UsageState::MarkedUnused,
            recorded: Vec::new(),
        }
    }

    /// Creates a tracker for a response of unknown usage status, forcing
    /// the engine to fall back to a body scan.
    pub fn unknown() -> Self {
        Self {
            state: UsageState::Unmarked,
            recorded: Vec::new(),
        }
    }

    /// Records a fragment URL encountered during rendering.
    pub fn record(&mut self, src: impl Into<String>) {
        self.recorded.push(src.into());
        self.state = UsageState::Pending;
    }

    /// Records `src` and returns the literal marker text to emit into the
    /// page — the template-layer integration point.
    pub fn render_marker(&mut self, src: &str) -> String {
        self.record(src);
        markers::marker_text(src)
    }

    /// Returns the current state.
    pub fn state(&self) -> UsageState {
        self.state
    }

    /// Returns `true` if at least one fragment URL was recorded.
    pub fn was_used(&self) -> bool {
        self.state == UsageState::Pending
    }

    /// Returns the recorded fragment URLs in encounter order.
    pub fn recorded(&self) -> &[String] {
        &self.recorded
    }

    // Terminal transition; the engine calls this once composition ran.
    fn finish(&mut self) {
        self.state = UsageState::Resolved;
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The fragment resolution engine.
///
/// Owns the orchestration for one response at a time: decide whether
/// resolution is needed, obtain ordered fragment descriptors, fetch each
/// fragment sequentially in encounter order, splice, merge headers and
/// cookies, and cache the pre-splice page for reassembly on later
/// requests.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use resi::cache::MemoryStore;
/// use resi::engine::{EngineConfig, EsiEngine, UsageTracker};
/// use resi::http::{PageRequest, PageResponse};
/// # use async_trait::async_trait;
/// # use resi::client::{DispatchError, Dispatcher, SubRequest};
/// # struct App;
/// # #[async_trait]
/// # impl Dispatcher for App {
/// #     async fn dispatch(&self, _r: SubRequest) -> Result<PageResponse, DispatchError> {
/// #         Ok(PageResponse::ok())
/// #     }
/// # }
///
/// # async fn example() -> Result<PageResponse, Box<dyn std::error::Error>> {
/// let engine = EsiEngine::new(Arc::new(App), Arc::new(MemoryStore::new()), EngineConfig::default())?;
///
/// let page = PageRequest::get("/articles/");
///
/// // Request time: short-circuit on a composed-page cache hit.
/// if let Some(cached) = engine.try_cached(&page).await {
///     return Ok(cached);
/// }
///
/// // Otherwise render through the outer framework, tracking usage...
/// let mut tracker = UsageTracker::new();
/// let body = format!("<ul>{}</ul>", tracker.render_marker("/articles/latest/"));
/// let rendered = PageResponse::ok().body(body);
///
/// // ...and compose at response time.
/// let composed = engine.resolve(&page, tracker, rendered).await?;
/// # Ok(composed)
/// # }
/// ```
pub struct EsiEngine<D, C> {
    client: FragmentClient<D>,
    cache: Arc<C>,
    config: EngineConfig,
}

impl<D: Dispatcher, C: CacheStore> EsiEngine<D, C> {
    /// Creates an engine over the given dispatcher and cache store.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] if the configuration fails validation.
    pub fn new(dispatcher: Arc<D>, cache: Arc<C>, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let mut client = FragmentClient::new(dispatcher);
        if let Some(timeout) = config.fragment_timeout {
            client = client.with_timeout(timeout);
        }

        Ok(Self {
            client,
            cache,
            config,
        })
    }

    /// Returns the engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolves every include marker in `response`, consuming the
    /// request's usage tracker.
    ///
    /// A `MarkedUnused` tracker returns the response unchanged without
    /// any body scan. A `Pending` tracker locates the recorded markers in
    /// the body; an `Unmarked` tracker falls back to a full scan
    /// (memoized by content hash when configured). Composed pages with a
    /// 200 status are cached pre-splice under the page's full path.
    ///
    /// # Errors
    ///
    /// [`EngineError::Compression`] if the response claims gzip encoding
    /// but its body cannot be decompressed (or the spliced body cannot be
    /// recompressed).
    pub async fn resolve(
        &self,
        page: &PageRequest,
        mut tracker: UsageTracker,
        mut response: PageResponse,
    ) -> Result<PageResponse, EngineError> {
        match tracker.state() {
            UsageState::MarkedUnused | UsageState::Resolved => {
                tracker.finish();
                return Ok(response);
            }
            UsageState::Pending | UsageState::Unmarked => {}
        }

        let was_gzipped = compress::is_gzipped(&response);
        if was_gzipped {
            compress::gunzip_response(&mut response)?;
        }

        let descriptors = match tracker.state() {
            UsageState::Pending => {
                descriptors_from_recorded(response.content(), page.path(), tracker.recorded())
            }
            _ => {
                let found = if self.config.memoize_scans {
                    self.memoized_scan(response.content()).await
                } else {
                    markers::find_markers(response.content())
                };
                found
                    .iter()
                    .map(|marker| {
                        let target = markers::resolve_src(page.path(), &marker.src);
                        FragmentDescriptor::from_marker(marker, target)
                    })
                    .collect()
            }
        };

        if descriptors.is_empty() {
            if was_gzipped {
                compress::gzip_response(&mut response)?;
            }
            tracker.finish();
            return Ok(response);
        }

        let cacheable = response.is_ok();
        let original_body = response.content().clone();

        let mut composed = self.fill(page, response, &descriptors).await;

        if cacheable {
            let entry = PageEntry {
                body: original_body.to_vec(),
                fragments: descriptors,
            };
            match entry.to_bytes() {
                Ok(bytes) => {
                    self.cache_put(&cache::page_key(&page.full_path()), bytes).await;
                }
                Err(error) => {
                    tracing::warn!(page = %page.full_path(), %error, "failed to encode page entry");
                }
            }
        }

        if was_gzipped {
            compress::gzip_response(&mut composed)?;
        }
        tracker.finish();
        Ok(composed)
    }

    /// Reassembles a previously-composed page from cache, skipping the
    /// outer framework entirely.
    ///
    /// The cache holds the *pre-splice* body and its fragment descriptors;
    /// fragments are re-fetched on every hit so their content stays fresh.
    /// Returns `None` on a cache miss, a store failure, or a corrupt
    /// entry — the caller proceeds with a normal render.
    pub async fn try_cached(&self, page: &PageRequest) -> Option<PageResponse> {
        let key = cache::page_key(&page.full_path());
        let raw = self.cache_get(&key).await?;
        let entry = match PageEntry::from_bytes(&raw) {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(%key, %error, "corrupt composed-page entry, ignoring");
                return None;
            }
        };

        tracing::debug!(%key, fragments = entry.fragments.len(), "composed-page cache hit");

        let response = PageResponse::ok().body_bytes(entry.body);
        Some(self.fill(page, response, &entry.fragments).await)
    }

    // Fetches every descriptor's fragment sequentially in encounter order,
    // splices the bodies in, and folds mergeable headers and cookies into
    // the response. Fetch failures never escape: they become empty content
    // under the default policy.
    async fn fill(
        &self,
        page: &PageRequest,
        mut response: PageResponse,
        descriptors: &[FragmentDescriptor],
    ) -> PageResponse {
        let mut fragment_headers = Headers::new();
        let mut fragment_jars: Vec<CookieJar> = Vec::new();
        let mut replacements: Vec<Bytes> = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let fetched = if response.is_ok() || self.config.process_errors {
                match self.client.fetch(&descriptor.target, page).await {
                    Ok(fragment) => Some(fragment),
                    Err(error) => {
                        tracing::error!(
                            fragment = %descriptor.target,
                            page = %page.full_path(),
                            %error,
                            "fragment fetch failed"
                        );
                        None
                    }
                }
            } else {
                // Error page: substitute empty fragments without fetching,
                // so a failing page cannot cascade into fragment traffic.
                None
            };

            let Some(fragment) = fetched else {
                replacements.push(Bytes::new());
                continue;
            };

            if !fragment.is_ok() {
                tracing::error!(
                    fragment = %descriptor.target,
                    status = fragment.status(),
                    page = %page.full_path(),
                    "fragment returned error status"
                );
            }

            // Suppress error-fragment content unless configured otherwise;
            // its mergeable headers and cookies still participate.
            if fragment.is_ok() || self.config.process_errors {
                replacements.push(fragment.content().clone());
            } else {
                replacements.push(Bytes::new());
            }

            merge::collect_mergeable(&mut fragment_headers, &fragment);
            if !fragment.cookies().is_empty() {
                fragment_jars.push(fragment.cookies().clone());
            }
        }

        let spliced = markers::splice(
            response.content(),
            descriptors.iter().map(FragmentDescriptor::span),
            &replacements,
        );
        response.set_content(spliced);

        merge::merge_fragment_headers(&mut response, &fragment_headers);
        merge::merge_fragment_cookies(&mut response, fragment_jars);
        response
    }

    // Body scan with content-hash memoization: identical bodies are
    // scanned once per cache lifetime.
    async fn memoized_scan(&self, body: &[u8]) -> Vec<IncludeMarker> {
        let key = cache::scan_key(body);
        if let Some(raw) = self.cache_get(&key).await {
            match ScanEntry::from_bytes(&raw) {
                Ok(entry) => {
                    tracing::debug!(%key, markers = entry.markers.len(), "marker-scan memo hit");
                    return entry.markers;
                }
                Err(error) => {
                    tracing::warn!(%key, %error, "corrupt scan entry, rescanning");
                }
            }
        }

        let found = markers::find_markers(body);
        let entry = ScanEntry {
            markers: found.clone(),
        };
        match entry.to_bytes() {
            Ok(bytes) => self.cache_put(&key, bytes).await,
            Err(error) => tracing::warn!(%key, %error, "failed to encode scan entry"),
        }
        found
    }

    // Store reads degrade to a miss; the page composes without cache help.
    async fn cache_get(&self, key: &str) -> Option<Vec<u8>> {
        match self.cache.get(key).await {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%key, %error, "cache store get failed, treating as miss");
                None
            }
        }
    }

    // Store writes degrade to not-cached.
    async fn cache_put(&self, key: &str, value: Vec<u8>) {
        if let Err(error) = self.cache.set(key, value).await {
            tracing::warn!(%key, %error, "cache store set failed, skipping");
        }
    }
}

// Locates each recorded marker in the body, in encounter order. The
// template layer emits the exact text `render_marker` returned, so a
// plain forward search suffices; a recorded marker that is no longer
// present (a post-render rewrite removed it) is skipped with a warning.
fn descriptors_from_recorded(
    body: &[u8],
    page_path: &str,
    recorded: &[String],
) -> Vec<FragmentDescriptor> {
    let mut descriptors = Vec::with_capacity(recorded.len());
    let mut search_from = 0;

    for src in recorded {
        let text = markers::marker_text(src);
        let needle = text.as_bytes();
        let found = body[search_from..]
            .windows(needle.len())
            .position(|window| window == needle);

        match found {
            Some(offset) => {
                let start = search_from + offset;
                descriptors.push(FragmentDescriptor {
                    src: src.clone(),
                    target: markers::resolve_src(page_path, src),
                    start,
                    end: start + needle.len(),
                });
                search_from = start + needle.len();
            }
            None => {
                tracing::warn!(%src, "recorded fragment marker not found in body");
            }
        }
    }

    descriptors
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::client::{DispatchError, SubRequest};
    use crate::http::Cookie;

    // Dispatches against a fixed route table and records every fetched
    // path, so tests can assert what was (or was not) fetched.
    struct MapDispatcher {
        routes: HashMap<String, PageResponse>,
        log: Mutex<Vec<String>>,
    }

    impl MapDispatcher {
        fn new(routes: Vec<(&str, PageResponse)>) -> Self {
            Self {
                routes: routes
                    .into_iter()
                    .map(|(path, response)| (path.to_owned(), response))
                    .collect(),
                log: Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dispatcher for MapDispatcher {
        async fn dispatch(&self, request: SubRequest) -> Result<PageResponse, DispatchError> {
            self.log.lock().unwrap().push(request.full_path());
            match self.routes.get(&request.full_path()) {
                Some(response) => Ok(response.clone()),
                None => Ok(PageResponse::new(404).body("Not Found")),
            }
        }
    }

    fn engine_with(
        routes: Vec<(&str, PageResponse)>,
        config: EngineConfig,
    ) -> (EsiEngine<MapDispatcher, cache::MemoryStore>, Arc<MapDispatcher>, Arc<cache::MemoryStore>) {
        let dispatcher = Arc::new(MapDispatcher::new(routes));
        let store = Arc::new(cache::MemoryStore::new());
        let engine = EsiEngine::new(Arc::clone(&dispatcher), Arc::clone(&store), config)
            .expect("valid config");
        (engine, dispatcher, store)
    }

    // ── usage tracking ────────────────────────────────────────────────────────

    #[test]
    fn tracker_starts_marked_unused() {
        let tracker = UsageTracker::new();
        assert_eq!(tracker.state(), UsageState::MarkedUnused);
        assert!(!tracker.was_used());
    }

    #[test]
    fn record_moves_to_pending() {
        let mut tracker = UsageTracker::new();
        tracker.record("/a/");
        tracker.record("/b/");
        assert_eq!(tracker.state(), UsageState::Pending);
        assert!(tracker.was_used());
        assert_eq!(tracker.recorded(), &["/a/".to_owned(), "/b/".to_owned()]);
    }

    #[test]
    fn render_marker_records_and_emits() {
        let mut tracker = UsageTracker::new();
        let tag = tracker.render_marker("/hello/7/");
        assert_eq!(tag, "<esi:include src=\"/hello/7/\" />");
        assert_eq!(tracker.recorded(), &["/hello/7/".to_owned()]);
    }

    #[test]
    fn finish_is_terminal() {
        let mut tracker = UsageTracker::unknown();
        assert_eq!(tracker.state(), UsageState::Unmarked);
        tracker.finish();
        assert_eq!(tracker.state(), UsageState::Resolved);
    }

    // ── configuration ─────────────────────────────────────────────────────────

    #[test]
    fn zero_timeout_is_rejected_at_construction() {
        let dispatcher = Arc::new(MapDispatcher::new(vec![]));
        let store = Arc::new(cache::MemoryStore::new());
        let config = EngineConfig {
            fragment_timeout: Some(Duration::ZERO),
            ..EngineConfig::default()
        };
        let result = EsiEngine::new(dispatcher, store, config);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    // ── resolution ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn end_to_end_hello() {
        let (engine, _, _) =
            engine_with(vec![("/hello/7/", PageResponse::ok().body("7"))], EngineConfig::default());

        let page = PageRequest::get("/page/");
        let mut tracker = UsageTracker::new();
        let body = tracker.render_marker("/hello/7/");
        let rendered = PageResponse::ok().body(body);

        let composed = engine.resolve(&page, tracker, rendered).await.unwrap();
        assert_eq!(composed.content(), "7".as_bytes());
    }

    #[tokio::test]
    async fn unused_tracker_skips_everything() {
        let (engine, dispatcher, store) = engine_with(vec![], EngineConfig::default());

        let page = PageRequest::get("/page/");
        // Marker text in the body, but the tracker says no include ran —
        // the engine must not even scan.
        let rendered = PageResponse::ok().body("<esi:include src=\"/a/\" />");
        let original = rendered.content().clone();

        let composed = engine
            .resolve(&page, UsageTracker::new(), rendered)
            .await
            .unwrap();
        assert_eq!(composed.content(), &original);
        assert!(dispatcher.fetched().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn no_marker_body_is_byte_identical() {
        let (engine, _, _) = engine_with(vec![], EngineConfig::default());

        let page = PageRequest::get("/page/");
        let rendered = PageResponse::ok()
            .header("X-Kept", "yes")
            .cookie(Cookie::new("kept", "yes"))
            .body("plain <b>html</b> without includes");
        let original = rendered.content().clone();

        let composed = engine
            .resolve(&page, UsageTracker::unknown(), rendered)
            .await
            .unwrap();
        assert_eq!(composed.content(), &original);
        assert_eq!(composed.headers().get("X-Kept"), Some("yes"));
        assert_eq!(composed.cookies().get("kept").unwrap().value, "yes");
    }

    #[tokio::test]
    async fn unknown_status_falls_back_to_scan() {
        let (engine, _, _) = engine_with(
            vec![("/frag/", PageResponse::ok().body("FRAGMENT"))],
            EngineConfig::default(),
        );

        let page = PageRequest::get("/page/");
        let rendered = PageResponse::ok().body("[<esi:include src=\"/frag/\" />]");
        let composed = engine
            .resolve(&page, UsageTracker::unknown(), rendered)
            .await
            .unwrap();
        assert_eq!(composed.content(), "[FRAGMENT]".as_bytes());
    }

    #[tokio::test]
    async fn scan_result_is_memoized_by_content_hash() {
        let (engine, _, store) = engine_with(vec![], EngineConfig::default());

        let page = PageRequest::get("/page/");
        let body = "no includes here";
        engine
            .resolve(&page, UsageTracker::unknown(), PageResponse::ok().body(body))
            .await
            .unwrap();

        let key = cache::scan_key(body.as_bytes());
        let raw = store.get(&key).await.unwrap().expect("scan memoized");
        let entry = ScanEntry::from_bytes(&raw).unwrap();
        assert!(entry.markers.is_empty());
    }

    #[tokio::test]
    async fn scan_memoization_can_be_disabled() {
        let config = EngineConfig {
            memoize_scans: false,
            ..EngineConfig::default()
        };
        let (engine, _, store) = engine_with(vec![], config);

        let page = PageRequest::get("/page/");
        engine
            .resolve(&page, UsageTracker::unknown(), PageResponse::ok().body("plain"))
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn multiple_fragments_splice_in_order() {
        let (engine, _, _) = engine_with(
            vec![
                ("/long/", PageResponse::ok().body("L".repeat(100))),
                ("/short/", PageResponse::ok().body("s")),
            ],
            EngineConfig::default(),
        );

        let page = PageRequest::get("/page/");
        let mut tracker = UsageTracker::new();
        let body = format!(
            "a{}b{}c",
            tracker.render_marker("/long/"),
            tracker.render_marker("/short/")
        );
        let composed = engine
            .resolve(&page, tracker, PageResponse::ok().body(body))
            .await
            .unwrap();
        let expected = format!("a{}bsc", "L".repeat(100));
        assert_eq!(composed.content(), expected.as_bytes());
    }

    #[tokio::test]
    async fn relative_srcs_resolve_against_page_path() {
        let (engine, dispatcher, _) = engine_with(
            vec![("/hello/7/", PageResponse::ok().body("7"))],
            EngineConfig::default(),
        );

        let page = PageRequest::get("/hello/");
        let mut tracker = UsageTracker::new();
        let body = tracker.render_marker("./7/");
        let composed = engine
            .resolve(&page, tracker, PageResponse::ok().body(body))
            .await
            .unwrap();
        assert_eq!(composed.content(), "7".as_bytes());
        assert_eq!(dispatcher.fetched(), vec!["/hello/7/".to_owned()]);
    }

    // ── failure policy ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn fragment_404_becomes_empty_content() {
        let (engine, _, _) = engine_with(vec![], EngineConfig::default());

        let page = PageRequest::get("/page/");
        let mut tracker = UsageTracker::new();
        let body = format!("[{}]", tracker.render_marker("/missing/"));
        let composed = engine
            .resolve(&page, tracker, PageResponse::ok().body(body))
            .await
            .unwrap();
        assert_eq!(composed.content(), "[]".as_bytes());
    }

    #[tokio::test]
    async fn process_errors_propagates_fragment_content() {
        let config = EngineConfig {
            process_errors: true,
            ..EngineConfig::default()
        };
        let (engine, _, _) = engine_with(vec![], config);

        let page = PageRequest::get("/page/");
        let mut tracker = UsageTracker::new();
        let body = format!("[{}]", tracker.render_marker("/missing/"));
        let composed = engine
            .resolve(&page, tracker, PageResponse::ok().body(body))
            .await
            .unwrap();
        assert_eq!(composed.content(), "[Not Found]".as_bytes());
    }

    #[tokio::test]
    async fn error_pages_do_not_fetch_fragments() {
        let (engine, dispatcher, _) = engine_with(
            vec![("/frag/", PageResponse::ok().body("FRAGMENT"))],
            EngineConfig::default(),
        );

        let page = PageRequest::get("/broken/");
        let mut tracker = UsageTracker::new();
        let body = format!("error page [{}]", tracker.render_marker("/frag/"));
        let composed = engine
            .resolve(&page, tracker, PageResponse::new(500).body(body))
            .await
            .unwrap();

        assert_eq!(composed.content(), "error page []".as_bytes());
        assert!(dispatcher.fetched().is_empty());
        assert_eq!(composed.status(), 500);
    }

    // ── metadata merging ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn merges_vary_and_last_modified_across_fragments() {
        let newer = httpdate::fmt_http_date(
            std::time::UNIX_EPOCH + Duration::from_secs(60_000),
        );
        let older = httpdate::fmt_http_date(
            std::time::UNIX_EPOCH + Duration::from_secs(10_000),
        );
        let (engine, _, _) = engine_with(
            vec![
                (
                    "/a/",
                    PageResponse::ok()
                        .header("Vary", "Cookie")
                        .header("Last-Modified", older.clone())
                        .body("A"),
                ),
                (
                    "/b/",
                    PageResponse::ok()
                        .header("Vary", "Cookie, Accept-Language")
                        .header("Last-Modified", newer.clone())
                        .body("B"),
                ),
            ],
            EngineConfig::default(),
        );

        let page = PageRequest::get("/page/");
        let mut tracker = UsageTracker::new();
        let body = format!("{}{}", tracker.render_marker("/a/"), tracker.render_marker("/b/"));
        let rendered = PageResponse::ok()
            .header("Vary", "Accept-Encoding")
            .body(body);

        let composed = engine.resolve(&page, tracker, rendered).await.unwrap();
        assert_eq!(
            composed.headers().get("Vary"),
            Some("Accept-Encoding, Cookie, Accept-Language")
        );
        assert_eq!(composed.headers().get("Last-Modified"), Some(newer.as_str()));
    }

    #[tokio::test]
    async fn page_cookies_beat_fragment_cookies() {
        let (engine, _, _) = engine_with(
            vec![(
                "/cookies/",
                PageResponse::ok()
                    .cookie(Cookie::new("a", "apple"))
                    .cookie(Cookie::new("b", "banana").path("/cookies/"))
                    .body("C"),
            )],
            EngineConfig::default(),
        );

        let page = PageRequest::get("/page/");
        let mut tracker = UsageTracker::new();
        let body = tracker.render_marker("/cookies/");
        let rendered = PageResponse::ok()
            .cookie(Cookie::new("a", "alligator"))
            .body(body);

        let composed = engine.resolve(&page, tracker, rendered).await.unwrap();
        assert_eq!(composed.cookies().get("a").unwrap().value, "alligator");
        let b = composed.cookies().get("b").unwrap();
        assert_eq!(b.value, "banana");
        assert_eq!(b.path.as_deref(), Some("/cookies/"));
    }

    // ── caching ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cache_round_trip_matches_direct_resolution() {
        let (engine, dispatcher, _) = engine_with(
            vec![("/frag/", PageResponse::ok().body("FRESH"))],
            EngineConfig::default(),
        );

        let page = PageRequest::get("/page/?v=1");
        let mut tracker = UsageTracker::new();
        let body = format!("[{}]", tracker.render_marker("/frag/"));

        let direct = engine
            .resolve(&page, tracker, PageResponse::ok().body(body))
            .await
            .unwrap();
        assert_eq!(direct.content(), "[FRESH]".as_bytes());

        // Second request to the same full path short-circuits through the
        // cache, re-fetching the fragment.
        let cached = engine.try_cached(&page).await.expect("cache hit");
        assert_eq!(cached.content(), direct.content());
        assert_eq!(dispatcher.fetched(), vec!["/frag/".to_owned(), "/frag/".to_owned()]);
    }

    #[tokio::test]
    async fn cache_miss_returns_none() {
        let (engine, _, _) = engine_with(vec![], EngineConfig::default());
        let page = PageRequest::get("/never-seen/");
        assert!(engine.try_cached(&page).await.is_none());
    }

    #[tokio::test]
    async fn error_pages_are_not_cached() {
        let (engine, _, store) = engine_with(vec![], EngineConfig::default());

        let page = PageRequest::get("/broken/");
        let mut tracker = UsageTracker::new();
        let body = tracker.render_marker("/frag/");
        engine
            .resolve(&page, tracker, PageResponse::new(500).body(body))
            .await
            .unwrap();

        let key = cache::page_key("/broken/");
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_a_miss() {
        let (engine, _, store) = engine_with(vec![], EngineConfig::default());
        let page = PageRequest::get("/page/");
        store
            .set(&cache::page_key("/page/"), b"garbage".to_vec())
            .await
            .unwrap();
        assert!(engine.try_cached(&page).await.is_none());
    }

    #[tokio::test]
    async fn store_failures_degrade_to_recompute() {
        struct FailingStore;

        #[async_trait]
        impl CacheStore for FailingStore {
            async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, cache::StoreError> {
                Err(cache::StoreError::Unavailable("down".to_owned()))
            }
            async fn set(&self, _key: &str, _value: Vec<u8>) -> Result<(), cache::StoreError> {
                Err(cache::StoreError::Unavailable("down".to_owned()))
            }
        }

        let dispatcher = Arc::new(MapDispatcher::new(vec![(
            "/frag/",
            PageResponse::ok().body("F"),
        )]));
        let engine = EsiEngine::new(
            Arc::clone(&dispatcher),
            Arc::new(FailingStore),
            EngineConfig::default(),
        )
        .unwrap();

        let page = PageRequest::get("/page/");
        assert!(engine.try_cached(&page).await.is_none());

        let mut tracker = UsageTracker::new();
        let body = tracker.render_marker("/frag/");
        let composed = engine
            .resolve(&page, tracker, PageResponse::ok().body(body))
            .await
            .unwrap();
        assert_eq!(composed.content(), "F".as_bytes());
    }

    // ── compression ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn gzipped_responses_are_spliced_transparently() {
        let (engine, _, _) = engine_with(
            vec![("/frag/", PageResponse::ok().body("a".repeat(500)))],
            EngineConfig::default(),
        );

        let page = PageRequest::get("/page/");
        let filler = "z".repeat(250);
        let body = format!("{filler}<esi:include src=\"/frag/\" />{filler}");
        let mut rendered = PageResponse::ok().body(body);
        compress::gzip_response(&mut rendered).unwrap();

        let mut composed = engine
            .resolve(&page, UsageTracker::unknown(), rendered)
            .await
            .unwrap();

        assert!(compress::is_gzipped(&composed));
        compress::gunzip_response(&mut composed).unwrap();
        let expected = format!("{filler}{}{filler}", "a".repeat(500));
        assert_eq!(composed.content(), expected.as_bytes());
    }

    #[tokio::test]
    async fn undecodable_gzip_is_fatal() {
        let (engine, _, _) = engine_with(vec![], EngineConfig::default());

        let page = PageRequest::get("/page/");
        let rendered = PageResponse::ok()
            .header("Content-Encoding", "gzip")
            .body("not actually gzip");

        let result = engine.resolve(&page, UsageTracker::unknown(), rendered).await;
        assert!(matches!(result, Err(EngineError::Compression(_))));
    }
}
