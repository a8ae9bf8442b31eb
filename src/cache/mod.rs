//! Composed-page caching over an external key-value store.
//!
//! What gets cached is the *pre-splice* body plus the fragment descriptors
//! found in it — never the spliced output — so a cache hit re-fetches the
//! fragments and keeps them fresh while skipping the page render.
//!
//! Two key families share one store:
//!
//! - `page:` + full request path (including query string) — composed-page
//!   entries, looked up before dispatching to the outer framework.
//! - `scan:` + SHA-256 of the body — marker-scan memoization for responses
//!   whose usage status is unknown, so identical bodies are scanned once.
//!
//! The store itself is external and externally synchronized; concurrent
//! writers to one key race and the last write wins. A store failure is
//! never fatal — the engine degrades to always-recompute.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::markers::IncludeMarker;

/// Errors from a cache store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or refused the operation.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    /// An entry could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// The external key-value store the engine caches into.
///
/// Only `get`/`set` are required — no TTL, eviction, or transactions.
/// Implementations wrap whatever the deployment uses (Redis, memcached, a
/// process-local map); the engine treats any error as a miss.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetches the raw value stored under `key`, or `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key`, overwriting any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}

/// One include marker of a cached page, in resolved form.
///
/// Carries the literal `src` attribute, the absolute URL it resolved to,
/// and the marker's byte span in the cached pre-splice body — everything a
/// cache hit needs to re-fetch and re-splice without scanning or resolving
/// again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentDescriptor {
    /// The marker's literal `src` attribute.
    pub src: String,
    /// Absolute URL the src resolved to against the page path.
    pub target: String,
    /// Byte offset of the marker in the pre-splice body.
    pub start: usize,
    /// Byte offset one past the marker's end.
    pub end: usize,
}

impl FragmentDescriptor {
    /// Builds a descriptor from a scanned marker and its resolved target.
    pub fn from_marker(marker: &IncludeMarker, target: impl Into<String>) -> Self {
        Self {
            src: marker.src.clone(),
            target: target.into(),
            start: marker.start,
            end: marker.end,
        }
    }

    /// Returns the `(start, end)` byte span of the marker text.
    pub fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }
}

/// A composed-page cache entry: the pre-splice body and the fragments to
/// splice into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    /// The original (pre-splice, decompressed) response body.
    pub body: Vec<u8>,
    /// Fragment descriptors in marker-encounter order.
    pub fragments: Vec<FragmentDescriptor>,
}

impl PageEntry {
    /// Serializes the entry for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Deserializes an entry fetched from storage.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(raw).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// A memoized marker scan for one body shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    /// Markers found in the body, possibly none.
    pub markers: Vec<IncludeMarker>,
}

impl ScanEntry {
    /// Serializes the entry for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Deserializes an entry fetched from storage.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(raw).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// Cache key for the composed-page entry of a request path.
///
/// The full path includes the query string: `/page/?v=2` and `/page/` are
/// different pages.
pub fn page_key(full_path: &str) -> String {
    format!("page:{full_path}")
}

/// Cache key for the marker-scan memoization of a body shape.
pub fn scan_key(body: &[u8]) -> String {
    format!("scan:{:x}", Sha256::digest(body))
}

/// In-memory [`CacheStore`] for tests and development.
///
/// A `HashMap` behind an async `RwLock`; production deployments implement
/// [`CacheStore`] over their real cache instead.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_owned(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_entry_roundtrips_through_json() {
        let entry = PageEntry {
            body: b"<esi:include src=\"/a/\" />".to_vec(),
            fragments: vec![FragmentDescriptor {
                src: "/a/".to_owned(),
                target: "/a/".to_owned(),
                start: 0,
                end: 25,
            }],
        };
        let decoded = PageEntry::from_bytes(&entry.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn scan_entry_roundtrips_through_json() {
        let entry = ScanEntry {
            markers: vec![IncludeMarker {
                src: "/a/".to_owned(),
                start: 3,
                end: 28,
            }],
        };
        let decoded = ScanEntry::from_bytes(&entry.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn corrupt_entry_is_an_error() {
        assert!(matches!(
            PageEntry::from_bytes(b"not json"),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn page_keys_include_the_query_string() {
        assert_eq!(page_key("/page/?v=2"), "page:/page/?v=2");
        assert_ne!(page_key("/page/"), page_key("/page/?v=2"));
    }

    #[test]
    fn scan_keys_are_content_addressed() {
        let a = scan_key(b"body one");
        let b = scan_key(b"body two");
        assert_eq!(a, scan_key(b"body one"));
        assert_ne!(a, b);
        assert!(a.starts_with("scan:"));
        assert_eq!(a.len(), "scan:".len() + 64);
    }

    #[tokio::test]
    async fn memory_store_get_set() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await);
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", b"v1".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v1".to_vec()));

        // last write wins
        store.set("k", b"v2".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.len().await, 1);
    }
}
