//! Save-game records and the storage they come from.
//!
//! Records serialize the way extensions read them:
//!
//! ```json
//! {
//!   "id": 3,
//!   "name": "before the boss",
//!   "type": 1,
//!   "mods": { "canonicalUrls": [], "resolvedUrls": [], "entryUrls": [], "semvers": [] },
//!   "content": {},
//!   "createdAt": 1700000000000,
//!   "updatedAt": 1700000000000
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::SaveId;

// ============================================================================
// SaveType
// ============================================================================

/// Why a save was written. Serialized as `1`, `2` or `3`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SaveType {
    /// Saved by the player.
    #[default]
    ManualSave = 1,
    /// Saved by the game on its own.
    AutoSave = 2,
    /// Quick-save slot.
    QuickSave = 3,
}

impl TryFrom<u8> for SaveType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::ManualSave),
            2 => Ok(Self::AutoSave),
            3 => Ok(Self::QuickSave),
            other => Err(Error::malformed(format!("unknown save type {other}"))),
        }
    }
}

impl From<SaveType> for u8 {
    fn from(value: SaveType) -> Self {
        value as u8
    }
}

// ============================================================================
// SaveMods
// ============================================================================

/// Mods active when a save was written, as parallel lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMods {
    /// Canonical URL of each mod.
    pub canonical_urls: Vec<String>,
    /// Resolved URL of each mod.
    pub resolved_urls: Vec<String>,
    /// Entry URL of each mod.
    pub entry_urls: Vec<String>,
    /// Version of each mod.
    pub semvers: Vec<String>,
}

impl SaveMods {
    /// Appends one mod to all four lists.
    pub fn push(
        &mut self,
        canonical_url: impl Into<String>,
        resolved_url: impl Into<String>,
        entry_url: impl Into<String>,
        semver: impl Into<String>,
    ) {
        self.canonical_urls.push(canonical_url.into());
        self.resolved_urls.push(resolved_url.into());
        self.entry_urls.push(entry_url.into());
        self.semvers.push(semver.into());
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.canonical_urls.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.canonical_urls.is_empty()
    }

    /// Checks that the four lists line up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if the lengths differ.
    pub fn validate(&self) -> Result<()> {
        let len = self.canonical_urls.len();
        if self.resolved_urls.len() != len
            || self.entry_urls.len() != len
            || self.semvers.len() != len
        {
            return Err(Error::malformed(format!(
                "save mod lists differ in length ({len}, {}, {}, {})",
                self.resolved_urls.len(),
                self.entry_urls.len(),
                self.semvers.len()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SaveRecord
// ============================================================================

/// Contents of a save that is not stored yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveDraft {
    /// Display name.
    pub name: String,
    /// Save kind.
    #[serde(rename = "type")]
    pub save_type: SaveType,
    /// Active mods.
    pub mods: SaveMods,
    /// Game-defined payload.
    pub content: Value,
}

/// A stored save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecord {
    /// Storage ID.
    pub id: SaveId,
    /// Display name.
    pub name: String,
    /// Save kind.
    #[serde(rename = "type")]
    pub save_type: SaveType,
    /// Active mods.
    pub mods: SaveMods,
    /// Game-defined payload.
    pub content: Value,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Last update time, milliseconds since the Unix epoch.
    pub updated_at: u64,
}

// ============================================================================
// SaveProvider
// ============================================================================

/// Storage behind the `getSaveFile` and `createSave` daemon methods.
#[async_trait]
pub trait SaveProvider: Send + Sync + 'static {
    /// Returns the save with `id`, or `None` if it does not exist.
    async fn get_save_file(&self, id: SaveId) -> Result<Option<SaveRecord>>;

    /// Returns the most recently updated save.
    async fn latest(&self) -> Result<Option<SaveRecord>>;

    /// Allocates an empty save and returns its ID.
    async fn create_save(&self) -> Result<SaveId>;
}

// ============================================================================
// MemorySaveStore
// ============================================================================

#[derive(Debug, Default)]
struct StoreInner {
    records: FxHashMap<SaveId, SaveRecord>,
    next_id: u64,
    last_tick: u64,
}

impl StoreInner {
    /// Wall-clock milliseconds, forced strictly increasing.
    fn tick(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self.last_tick = now.max(self.last_tick + 1);
        self.last_tick
    }
}

/// In-memory [`SaveProvider`] with monotonic IDs starting at `1`.
#[derive(Debug, Default)]
pub struct MemorySaveStore {
    inner: Mutex<StoreInner>,
}

impl MemorySaveStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a draft and returns the new record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if the mod lists do not line up.
    pub fn create(&self, draft: SaveDraft) -> Result<SaveRecord> {
        draft.mods.validate()?;

        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = SaveId::new(inner.next_id);
        let now = inner.tick();

        let record = SaveRecord {
            id,
            name: draft.name,
            save_type: draft.save_type,
            mods: draft.mods,
            content: draft.content,
            created_at: now,
            updated_at: now,
        };
        inner.records.insert(id, record.clone());
        debug!(save_id = %id, "Save created");
        Ok(record)
    }

    /// Replaces a record's contents and bumps its update time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no record has `id`, or
    /// [`Error::MalformedMessage`] if the mod lists do not line up.
    pub fn update(&self, id: SaveId, draft: SaveDraft) -> Result<SaveRecord> {
        draft.mods.validate()?;

        let mut inner = self.inner.lock();
        let now = inner.tick();
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::config(format!("save {id} does not exist")))?;

        record.name = draft.name;
        record.save_type = draft.save_type;
        record.mods = draft.mods;
        record.content = draft.content;
        record.updated_at = now;
        Ok(record.clone())
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }
}

#[async_trait]
impl SaveProvider for MemorySaveStore {
    async fn get_save_file(&self, id: SaveId) -> Result<Option<SaveRecord>> {
        Ok(self.inner.lock().records.get(&id).cloned())
    }

    async fn latest(&self) -> Result<Option<SaveRecord>> {
        Ok(self
            .inner
            .lock()
            .records
            .values()
            .max_by_key(|record| (record.updated_at, record.id))
            .cloned())
    }

    async fn create_save(&self) -> Result<SaveId> {
        self.create(SaveDraft::default()).map(|record| record.id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn draft(name: &str) -> SaveDraft {
        SaveDraft {
            name: name.to_string(),
            ..SaveDraft::default()
        }
    }

    #[test]
    fn test_save_type_wire_values() {
        assert_eq!(serde_json::to_value(SaveType::QuickSave).expect("json"), json!(3));
        assert_eq!(
            serde_json::from_value::<SaveType>(json!(2)).expect("json"),
            SaveType::AutoSave
        );
        assert!(serde_json::from_value::<SaveType>(json!(4)).is_err());
    }

    #[test]
    fn test_save_mods_validate() {
        let mut mods = SaveMods::default();
        mods.push(
            "https://a.example/",
            "https://cdn.example/a/",
            "https://cdn.example/a/i.js",
            "1.2.0",
        );
        assert!(mods.validate().is_ok());
        assert_eq!(mods.len(), 1);

        mods.entry_urls.pop();
        assert!(mods.validate().is_err());
    }

    #[test]
    fn test_save_mods_semvers_must_line_up() {
        let mut mods = SaveMods::default();
        mods.push(
            "https://a.example/",
            "https://cdn.example/a/",
            "https://cdn.example/a/i.js",
            "1.0.0",
        );
        mods.semvers.push("2.0.0".into());

        let err = mods.validate().unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));

        let store = MemorySaveStore::new();
        let draft = SaveDraft {
            mods,
            ..SaveDraft::default()
        };
        assert!(store.create(draft).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_record_shape() {
        let store = MemorySaveStore::new();
        let record = store.create(draft("first")).expect("create");
        let value = serde_json::to_value(&record).expect("json");

        assert_eq!(value["id"], json!(1));
        assert_eq!(value["type"], json!(1));
        for list in ["canonicalUrls", "resolvedUrls", "entryUrls", "semvers"] {
            assert!(value["mods"][list].is_array(), "missing {list}");
        }
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
    }

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let store = MemorySaveStore::new();
        let id = store.create_save().await.expect("create");

        let record = store.get_save_file(id).await.expect("get");
        assert_eq!(record.map(|r| r.id), Some(id));
        assert!(store.get_save_file(SaveId::new(99)).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = MemorySaveStore::new();
        let a = store.create_save().await.expect("create");
        let b = store.create_save().await.expect("create");
        assert!(b > a);
        assert_eq!(a, SaveId::new(1));
    }

    #[tokio::test]
    async fn test_latest_follows_updates() {
        let store = MemorySaveStore::new();
        assert!(store.latest().await.expect("latest").is_none());

        let first = store.create(draft("first")).expect("create");
        let second = store.create(draft("second")).expect("create");
        assert_eq!(store.latest().await.expect("latest").map(|r| r.id), Some(second.id));

        store.update(first.id, draft("first again")).expect("update");
        let latest = store.latest().await.expect("latest").expect("some");
        assert_eq!(latest.id, first.id);
        assert_eq!(latest.name, "first again");
        assert!(latest.updated_at > latest.created_at);
    }

    #[test]
    fn test_update_unknown_save() {
        let store = MemorySaveStore::new();
        assert!(store.update(SaveId::new(7), draft("x")).is_err());
    }
}
