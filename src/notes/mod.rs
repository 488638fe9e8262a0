//! Analyst notes on anomalous records.
//!
//! Notes are additive metadata: the classifier never reads them. They are
//! append-only, ordered by creation, and disappear with their owning record.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ClassifiedRecord, RecordId};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoteError {
    #[error("record {0} is not an anomaly; notes attach to anomalies only")]
    NotAnAnomaly(RecordId),
    #[error("note text is empty")]
    EmptyText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalystNote {
    /// Monotonic within a notebook; breaks ties between equal timestamps.
    pub seq: u64,
    pub author: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteBook {
    next_seq: u64,
    #[serde(with = "entries")]
    notes: BTreeMap<RecordId, Vec<AnalystNote>>,
}

impl NoteBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a note to an anomalous record.
    pub fn add_note(
        &mut self,
        record: &ClassifiedRecord,
        author: Option<String>,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<&AnalystNote, NoteError> {
        let id = record.record.id();
        if !record.verdict.is_anomaly {
            return Err(NoteError::NotAnAnomaly(id));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(NoteError::EmptyText);
        }

        let note = AnalystNote {
            seq: self.next_seq,
            author,
            text: text.to_string(),
            created_at,
        };
        self.next_seq += 1;

        let list = self.notes.entry(id).or_default();
        // Keep creation order even if a caller supplies an older timestamp.
        let pos = list.partition_point(|n| (n.created_at, n.seq) <= (note.created_at, note.seq));
        list.insert(pos, note);
        Ok(&list[pos])
    }

    /// Notes for a record, oldest first.
    pub fn notes_for(&self, id: &RecordId) -> &[AnalystNote] {
        self.notes.get(id).map_or(&[], Vec::as_slice)
    }

    /// Remove a record and every note attached to it. Returns how many notes went.
    pub fn remove_record(&mut self, id: &RecordId) -> usize {
        self.notes.remove(id).map_or(0, |v| v.len())
    }

    /// Drop notes whose record no longer exists.
    pub fn retain_records(&mut self, mut exists: impl FnMut(&RecordId) -> bool) -> usize {
        let before: usize = self.notes.values().map(Vec::len).sum();
        self.notes.retain(|id, _| exists(id));
        let after: usize = self.notes.values().map(Vec::len).sum();
        before - after
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordId, &[AnalystNote])> {
        self.notes.iter().map(|(id, v)| (id, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.notes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a notebook; a missing file is an empty notebook.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = File::open(path)
            .map_err(|e| AppError::new(2, format!("Failed to open notes '{}': {e}", path.display())))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| AppError::new(2, format!("Invalid notes JSON '{}': {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        let file = File::create(path)
            .map_err(|e| AppError::new(2, format!("Failed to create notes '{}': {e}", path.display())))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| AppError::new(2, format!("Failed to write notes JSON: {e}")))
    }
}

/// JSON object keys must be strings, so the map is stored as a list of entries.
mod entries {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::AnalystNote;
    use crate::domain::RecordId;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        record: RecordId,
        notes: Vec<AnalystNote>,
    }

    pub fn serialize<S: Serializer>(map: &BTreeMap<RecordId, Vec<AnalystNote>>, s: S) -> Result<S::Ok, S::Error> {
        let entries: Vec<Entry> = map
            .iter()
            .map(|(record, notes)| Entry {
                record: record.clone(),
                notes: notes.clone(),
            })
            .collect();
        entries.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<RecordId, Vec<AnalystNote>>, D::Error> {
        let entries = Vec::<Entry>::deserialize(d)?;
        Ok(entries.into_iter().map(|e| (e.record, e.notes)).collect())
    }
}
