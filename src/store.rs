//! Content store holding passage text and citation metadata.
//!
//! The index only stores passage ids. Everything a prompt needs to cite a
//! passage (text, document, page) lives here and is fetched per hit.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::vector::PassageId;

/// Errors raised by a content store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Content store I/O error: {0}\nSuggestion: Check that the store path exists and is writable")]
    Io(#[from] std::io::Error),

    #[error(
        "Content store file is corrupted: {0}\nSuggestion: Re-run `quarry ingest` to rebuild the store"
    )]
    Corrupted(String),

    #[error("Content store is unavailable: {0}")]
    Unavailable(String),
}

/// A stored passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub id: PassageId,
    /// Source document, usually the file name.
    pub doc_id: String,
    /// Position of the passage within its document.
    pub ordinal: u32,
    pub text: String,
    pub page_number: u32,
    pub file_path: String,
    pub start_pos: usize,
    pub end_pos: usize,
}

/// A passage before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPassage {
    pub doc_id: String,
    pub ordinal: u32,
    pub text: String,
    pub page_number: u32,
    pub file_path: String,
    pub start_pos: usize,
    pub end_pos: usize,
}

impl NewPassage {
    fn with_id(self, id: PassageId) -> Passage {
        Passage {
            id,
            doc_id: self.doc_id,
            ordinal: self.ordinal,
            text: self.text,
            page_number: self.page_number,
            file_path: self.file_path,
            start_pos: self.start_pos,
            end_pos: self.end_pos,
        }
    }
}

/// Lookup and insertion of passages by id.
pub trait PassageStore: Send + Sync {
    /// Fetches a passage; `Ok(None)` when no row exists for `id`.
    fn get_passage(&self, id: PassageId) -> Result<Option<Passage>, StoreError>;

    /// Stores a passage and returns its newly assigned id.
    fn insert_passage(&self, passage: NewPassage) -> Result<PassageId, StoreError>;

    /// All passages in ascending id order.
    fn passages(&self) -> Result<Vec<Passage>, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    next_id: u64,
    passages: Vec<Passage>,
}

/// Passage store kept in memory and persisted as a JSON file.
///
/// Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct JsonPassageStore {
    path: Option<PathBuf>,
    inner: RwLock<Rows>,
}

#[derive(Debug)]
struct Rows {
    next_id: u64,
    passages: BTreeMap<PassageId, Passage>,
}

impl Default for Rows {
    fn default() -> Self {
        Self {
            next_id: 1,
            passages: BTreeMap::new(),
        }
    }
}

impl JsonPassageStore {
    /// A store with no backing file; `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: RwLock::new(Rows::default()),
        }
    }

    /// Opens the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let rows = if path.exists() {
            let json = fs::read_to_string(&path)?;
            let file: StoreFile =
                serde_json::from_str(&json).map_err(|e| StoreError::Corrupted(e.to_string()))?;
            let passages: BTreeMap<_, _> = file.passages.into_iter().map(|p| (p.id, p)).collect();
            let max_id = passages.keys().next_back().map_or(0, |id| id.get());
            Rows {
                next_id: file.next_id.max(max_id + 1),
                passages,
            }
        } else {
            Rows::default()
        };

        debug!(path = %path.display(), passages = rows.passages.len(), "opened passage store");
        Ok(Self {
            path: Some(path),
            inner: RwLock::new(rows),
        })
    }

    /// Writes all rows to the backing file.
    pub fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = {
            let rows = self.inner.read();
            let file = StoreFile {
                next_id: rows.next_id,
                passages: rows.passages.values().cloned().collect(),
            };
            serde_json::to_string(&file).map_err(|e| StoreError::Corrupted(e.to_string()))?
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Removes every passage. Ids keep counting up.
    pub fn clear(&self) {
        self.inner.write().passages.clear();
    }

    /// Removes one passage, returning it if present.
    pub fn remove_passage(&self, id: PassageId) -> Option<Passage> {
        self.inner.write().passages.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().passages.is_empty()
    }
}

impl PassageStore for JsonPassageStore {
    fn get_passage(&self, id: PassageId) -> Result<Option<Passage>, StoreError> {
        Ok(self.inner.read().passages.get(&id).cloned())
    }

    fn insert_passage(&self, passage: NewPassage) -> Result<PassageId, StoreError> {
        let mut rows = self.inner.write();
        let id = PassageId::new(rows.next_id);
        rows.next_id += 1;
        rows.passages.insert(id, passage.with_id(id));
        Ok(id)
    }

    fn passages(&self) -> Result<Vec<Passage>, StoreError> {
        Ok(self.inner.read().passages.values().cloned().collect())
    }
}
