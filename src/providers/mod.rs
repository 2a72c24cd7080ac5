//! External collaborators the daemon delegates to.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `files` | `FileProvider`, in-memory cache, cache-first fetcher |
//! | `saves` | `SaveProvider`, save records, in-memory store |

// ============================================================================
// Submodules
// ============================================================================

/// File lookup by URL.
pub mod files;

/// Save-game storage.
pub mod saves;

// ============================================================================
// Re-exports
// ============================================================================

pub use files::{CacheFirst, CachedFile, DEFAULT_CONTENT_TYPE, FileProvider, MemoryFileCache};
pub use saves::{MemorySaveStore, SaveDraft, SaveMods, SaveProvider, SaveRecord, SaveType};
