//! Slot mapping: index slot numbers to passage identifiers.
//!
//! Slots are dense positions `0..len`. The mapping is append-only, and it is
//! persisted as a JSON array whose position `i` holds the passage id of
//! slot `i`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::vector::types::{PassageId, SlotId, VectorError};

/// Dense, append-only `SlotId -> PassageId` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotMapping {
    passages: Vec<PassageId>,
}

impl SlotMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `passage` at the next free slot and returns that slot.
    pub fn append(&mut self, passage: PassageId) -> SlotId {
        let slot = SlotId::new(self.passages.len() as u64);
        self.passages.push(passage);
        slot
    }

    /// Looks up the passage stored at `slot`.
    pub fn resolve(&self, slot: SlotId) -> Result<PassageId, VectorError> {
        self.passages
            .get(slot.as_index())
            .copied()
            .ok_or(VectorError::SlotOutOfRange {
                slot: slot.get(),
                len: self.passages.len(),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Passage ids in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, PassageId)> + '_ {
        self.passages
            .iter()
            .enumerate()
            .map(|(i, id)| (SlotId::new(i as u64), *id))
    }

    /// Writes the mapping as a JSON array.
    pub fn save(&self, path: &Path) -> Result<(), VectorError> {
        let json = serde_json::to_string(self)
            .map_err(|e| VectorError::InvalidFormat(format!("Failed to serialize mapping: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reads a mapping written by [`SlotMapping::save`].
    pub fn load(path: &Path) -> Result<Self, VectorError> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| VectorError::InvalidFormat(format!("Failed to parse mapping: {e}")))
    }
}

impl FromIterator<PassageId> for SlotMapping {
    fn from_iter<I: IntoIterator<Item = PassageId>>(iter: I) -> Self {
        Self {
            passages: iter.into_iter().collect(),
        }
    }
}
