//! # resi
//!
//! An embeddable Edge Side Includes (ESI) fragment composition engine for
//! async Rust web applications.
//!
//! A rendered page may contain include markers of the form
//! `<esi:include src="URL" />`. The engine resolves them by fetching each
//! referenced fragment through an in-process dispatch boundary, splicing
//! fragment bodies into the page with correct offset bookkeeping, merging
//! cross-fragment headers and cookies, and caching the pre-splice page so
//! later requests reassemble it without re-rendering.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use resi::cache::MemoryStore;
//! use resi::client::{DispatchError, Dispatcher, SubRequest};
//! use resi::engine::{EngineConfig, EsiEngine, UsageTracker};
//! use resi::http::{PageRequest, PageResponse};
//!
//! struct App;
//!
//! #[async_trait]
//! impl Dispatcher for App {
//!     async fn dispatch(&self, request: SubRequest) -> Result<PageResponse, DispatchError> {
//!         match request.path.as_str() {
//!             "/hello/7/" => Ok(PageResponse::ok().body("7")),
//!             _ => Ok(PageResponse::new(404)),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = EsiEngine::new(
//!         Arc::new(App),
//!         Arc::new(MemoryStore::new()),
//!         EngineConfig::default(),
//!     )?;
//!
//!     let page = PageRequest::get("/page/");
//!     let mut tracker = UsageTracker::new();
//!     let rendered = PageResponse::ok().body(tracker.render_marker("/hello/7/"));
//!
//!     let composed = engine.resolve(&page, tracker, rendered).await?;
//!     assert_eq!(composed.content(), "7".as_bytes());
//!     Ok(())
//! }
//! ```

// ── Core composition pipeline ─────────────────────────────────────────────────
pub mod engine;
pub mod markers;
pub mod merge;

// ── Boundaries: in-process dispatch and the external cache store ──────────────
pub mod cache;
pub mod client;

// ── Supporting layers ─────────────────────────────────────────────────────────
pub mod compress;
pub mod http;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheStore, FragmentDescriptor, MemoryStore, PageEntry, StoreError};
pub use client::{DispatchError, Dispatcher, FetchError, FragmentClient, SubRequest};
pub use engine::{EngineConfig, EngineError, EsiEngine, UsageState, UsageTracker};
pub use http::{Cookie, CookieJar, Headers, Method, PageRequest, PageResponse};
pub use markers::IncludeMarker;
