//! File access behind the `getFile` daemon method.
//!
//! Lookups are keyed by URL. [`CacheFirst`] answers from a local cache and
//! only falls through to a network provider on a miss, storing what it got.
//!
//! ```text
//! getFile(url) ──► MemoryFileCache ──hit──► CachedFile
//!                        │
//!                       miss
//!                        ▼
//!                  network provider ──► store in cache ──► CachedFile
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::Result;
use crate::protocol::FileTransfer;

// ============================================================================
// Constants
// ============================================================================

/// Content type used when a response declares none.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

// ============================================================================
// CachedFile
// ============================================================================

/// A cached response body and its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    /// MIME type.
    pub content_type: String,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl CachedFile {
    /// Creates a file. An empty `content_type` becomes `text/plain`.
    #[must_use]
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let content_type = content_type.into();
        Self {
            content_type: if content_type.is_empty() {
                DEFAULT_CONTENT_TYPE.to_string()
            } else {
                content_type
            },
            body: body.into(),
        }
    }

    /// Converts into the wire transfer form.
    #[must_use]
    pub fn into_transfer(self) -> FileTransfer {
        FileTransfer {
            content_type: self.content_type,
            length: self.body.len() as u64,
            body: self.body,
        }
    }
}

// ============================================================================
// FileProvider
// ============================================================================

/// Source of files by URL.
#[async_trait]
pub trait FileProvider: Send + Sync + 'static {
    /// Returns the file at `url`, or `None` if there is none.
    async fn get_file(&self, url: &str) -> Result<Option<CachedFile>>;
}

// ============================================================================
// MemoryFileCache
// ============================================================================

/// In-memory URL to file map.
#[derive(Debug, Default)]
pub struct MemoryFileCache {
    files: RwLock<FxHashMap<String, CachedFile>>,
}

impl MemoryFileCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a file, replacing any previous one.
    pub fn insert(&self, url: impl Into<String>, file: CachedFile) {
        self.files.write().insert(url.into(), file);
    }

    /// Returns a copy of the cached file.
    #[must_use]
    pub fn lookup(&self, url: &str) -> Option<CachedFile> {
        self.files.read().get(url).cloned()
    }

    /// Removes a file. Returns `true` if it was cached.
    pub fn remove(&self, url: &str) -> bool {
        self.files.write().remove(url).is_some()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[async_trait]
impl FileProvider for MemoryFileCache {
    async fn get_file(&self, url: &str) -> Result<Option<CachedFile>> {
        Ok(self.lookup(url))
    }
}

// ============================================================================
// CacheFirst
// ============================================================================

/// Cache lookup with an explicit miss path to a network provider.
pub struct CacheFirst {
    cache: Arc<MemoryFileCache>,
    network: Arc<dyn FileProvider>,
}

impl CacheFirst {
    /// Combines a cache with the provider used on misses.
    #[must_use]
    pub fn new(cache: Arc<MemoryFileCache>, network: Arc<dyn FileProvider>) -> Self {
        Self { cache, network }
    }

    /// Returns the cache.
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<MemoryFileCache> {
        &self.cache
    }
}

#[async_trait]
impl FileProvider for CacheFirst {
    async fn get_file(&self, url: &str) -> Result<Option<CachedFile>> {
        if let Some(file) = self.cache.lookup(url) {
            trace!(url, "File cache hit");
            return Ok(Some(file));
        }

        debug!(url, "File cache miss");
        let fetched = self.network.get_file(url).await?;
        if let Some(file) = &fetched {
            self.cache.insert(url, file.clone());
        }
        Ok(fetched)
    }
}

// ============================================================================
// Tests
// ============================================================================
