//! Bounded durable cache of completed sessions.
//!
//! One JSON file per item, named `<id>.json`, under a per-device data
//! directory. Inserts go through a temp file and an atomic rename;
//! deletes are single unlinks, so every operation either fully applies
//! or leaves the store unchanged. The store itself enforces no cap;
//! callers run `evict_excess` after inserting.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::types::MeditationScript;

/// One persisted, fully-assembled session, replayable without
/// regeneration. `id` is the creation timestamp in milliseconds and
/// doubles as the newest-first sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: u64,
    pub script: MeditationScript,
    pub image_url: String,
    pub audio_wav_base64: String,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("device storage quota exceeded while saving session")]
    QuotaExceeded,

    #[error("history record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Capability-checked store: opening probes the backend once, and every
/// operation on an unavailable store is a no-op instead of an error.
pub enum HistoryStore {
    Available(StoreDir),
    Unavailable { reason: String },
}

pub struct StoreDir {
    dir: PathBuf,
}

impl HistoryStore {
    /// Opens (creating if needed) the store directory. Failure to
    /// create it degrades to an unavailable store rather than an error.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "history store opened");
                HistoryStore::Available(StoreDir { dir })
            }
            Err(e) => {
                let reason = format!("cannot use {}: {e}", dir.display());
                warn!("history disabled: {reason}");
                HistoryStore::Unavailable { reason }
            }
        }
    }

    pub fn available(&self) -> bool {
        matches!(self, HistoryStore::Available(_))
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            HistoryStore::Available(_) => None,
            HistoryStore::Unavailable { reason } => Some(reason),
        }
    }

    /// Upserts one item by id. Skipped silently on an unavailable store.
    pub fn insert(&self, item: &HistoryItem) -> Result<(), HistoryError> {
        match self {
            HistoryStore::Available(store) => store.insert(item),
            HistoryStore::Unavailable { .. } => Ok(()),
        }
    }

    /// All items, newest first. Individually corrupt records are
    /// skipped with a warning rather than failing the listing.
    pub fn list_all(&self) -> Vec<HistoryItem> {
        match self {
            HistoryStore::Available(store) => store.list_all(),
            HistoryStore::Unavailable { .. } => Vec::new(),
        }
    }

    pub fn get(&self, id: u64) -> Option<HistoryItem> {
        match self {
            HistoryStore::Available(store) => store.read_item(&store.item_path(id)),
            HistoryStore::Unavailable { .. } => None,
        }
    }

    /// Item ids, newest first.
    pub fn ids(&self) -> Vec<u64> {
        match self {
            HistoryStore::Available(store) => store.ids(),
            HistoryStore::Unavailable { .. } => Vec::new(),
        }
    }

    pub fn latest_id(&self) -> Option<u64> {
        self.ids().first().copied()
    }

    /// Removes one item; absent ids are not an error.
    pub fn delete(&self, id: u64) -> Result<(), HistoryError> {
        match self {
            HistoryStore::Available(store) => store.delete(id),
            HistoryStore::Unavailable { .. } => Ok(()),
        }
    }

    /// Keeps only the `max_items` most recent items. Returns how many
    /// were removed.
    pub fn evict_excess(&self, max_items: usize) -> Result<usize, HistoryError> {
        match self {
            HistoryStore::Available(store) => store.evict_excess(max_items),
            HistoryStore::Unavailable { .. } => Ok(0),
        }
    }
}

impl StoreDir {
    fn item_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn insert(&self, item: &HistoryItem) -> Result<(), HistoryError> {
        let json = serde_json::to_vec(item)?;
        let path = self.item_path(item.id);
        let tmp = self.dir.join(format!("{}.json.tmp", item.id));

        if let Err(e) = fs::write(&tmp, &json) {
            let _ = fs::remove_file(&tmp);
            return Err(map_io(e));
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(map_io(e));
        }
        debug!(id = item.id, bytes = json.len(), "history item saved");
        Ok(())
    }

    fn ids(&self) -> Vec<u64> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("could not read history directory: {e}");
                return Vec::new();
            }
        };

        let mut ids: Vec<u64> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                let stem = name.strip_suffix(".json")?;
                stem.parse::<u64>().ok()
            })
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids
    }

    fn read_item(&self, path: &Path) -> Option<HistoryItem> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), "unreadable history record: {e}");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(path = %path.display(), "corrupt history record skipped: {e}");
                None
            }
        }
    }

    fn list_all(&self) -> Vec<HistoryItem> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.read_item(&self.item_path(id)))
            .collect()
    }

    fn delete(&self, id: u64) -> Result<(), HistoryError> {
        match fs::remove_file(self.item_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(e)),
        }
    }

    fn evict_excess(&self, max_items: usize) -> Result<usize, HistoryError> {
        let ids = self.ids();
        let mut removed = 0;
        for &id in ids.iter().skip(max_items) {
            self.delete(id)?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, kept = max_items.min(ids.len()), "history trimmed");
        }
        Ok(removed)
    }
}

const ENOSPC: i32 = 28;

fn map_io(e: io::Error) -> HistoryError {
    if e.raw_os_error() == Some(ENOSPC) {
        HistoryError::QuotaExceeded
    } else {
        HistoryError::Io(e)
    }
}
