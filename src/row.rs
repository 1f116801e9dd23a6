/// Row Registry
///
/// Owns the canonical mapping from row id to row record. Records are opaque
/// key-value maps owned by the caller; the registry never edits one in place,
/// updates always replace the record stored under its id.
///
/// # Examples
///
/// ```
/// use rowpipe::{CellValue, RowId, RowRegistry, RowUpdate};
/// use std::collections::HashMap;
///
/// let mut registry = RowRegistry::default();
///
/// let mut row = HashMap::new();
/// row.insert("id".to_string(), CellValue::Int(1));
/// row.insert("name".to_string(), CellValue::from("Alice"));
/// registry.set_rows(vec![row]).unwrap();
///
/// registry.update_rows(vec![RowUpdate::Delete(RowId::Int(1))]).unwrap();
/// assert!(registry.is_empty());
/// ```

use crate::column::CellValue;
use crate::error::{PipelineError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// A row record: field name to cell value
pub type RowRecord = HashMap<String, CellValue>;

/// Row identifier, unique within a registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Int(i64),
    Str(String),
}

impl RowId {
    /// Converts a cell value into a row id. Integral floats are accepted.
    pub fn from_cell(value: &CellValue) -> Option<RowId> {
        match value {
            CellValue::Int(v) => Some(RowId::Int(*v)),
            CellValue::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                Some(RowId::Int(*v as i64))
            }
            CellValue::String(s) => Some(RowId::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(v) => write!(f, "{}", v),
            RowId::Str(v) => f.write_str(v),
        }
    }
}

impl From<i64> for RowId {
    fn from(v: i64) -> Self {
        RowId::Int(v)
    }
}

impl From<i32> for RowId {
    fn from(v: i32) -> Self {
        RowId::Int(v as i64)
    }
}

impl From<&str> for RowId {
    fn from(v: &str) -> Self {
        RowId::Str(v.to_string())
    }
}

impl From<String> for RowId {
    fn from(v: String) -> Self {
        RowId::Str(v)
    }
}

/// How the id of a row is resolved
#[derive(Clone)]
pub enum RowIdAccessor {
    /// Read the id from a field of the record
    Field(String),
    /// Compute the id from the whole record
    Custom(Rc<dyn Fn(&RowRecord) -> Option<RowId>>),
}

impl RowIdAccessor {
    pub fn resolve(&self, row: &RowRecord) -> Option<RowId> {
        match self {
            RowIdAccessor::Field(field) => row.get(field).and_then(RowId::from_cell),
            RowIdAccessor::Custom(getter) => getter(row),
        }
    }
}

impl Default for RowIdAccessor {
    fn default() -> Self {
        RowIdAccessor::Field("id".to_string())
    }
}

impl fmt::Debug for RowIdAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowIdAccessor::Field(field) => f.debug_tuple("Field").field(field).finish(),
            RowIdAccessor::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A single change passed to `RowRegistry::update_rows`
#[derive(Debug, Clone, PartialEq)]
pub enum RowUpdate {
    /// Insert a new row, or merge the given fields into an existing one
    Upsert(RowRecord),
    /// Remove the row with this id
    Delete(RowId),
}

/// Counts of what an `update_rows` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl UpdateSummary {
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Canonical id → record mapping, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct RowRegistry {
    rows: IndexMap<RowId, RowRecord>,
    id_accessor: RowIdAccessor,
}

impl RowRegistry {
    pub fn new(id_accessor: RowIdAccessor) -> Self {
        RowRegistry {
            rows: IndexMap::new(),
            id_accessor,
        }
    }

    pub fn id_accessor(&self) -> &RowIdAccessor {
        &self.id_accessor
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, id: &RowId) -> bool {
        self.rows.contains_key(id)
    }

    pub fn get(&self, id: &RowId) -> Option<&RowRecord> {
        self.rows.get(id)
    }

    /// Raw field value of a row; Null when the row or field is missing
    pub fn value(&self, id: &RowId, field: &str) -> CellValue {
        self.rows
            .get(id)
            .and_then(|row| row.get(field))
            .cloned()
            .unwrap_or(CellValue::Null)
    }

    pub fn ids(&self) -> impl Iterator<Item = &RowId> {
        self.rows.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowId, &RowRecord)> {
        self.rows.iter()
    }

    /// Builds a registry from a full row set without touching `self`.
    ///
    /// A row without a resolvable id or a repeated id is a configuration
    /// error; nothing is overwritten.
    pub fn with_rows(&self, rows: Vec<RowRecord>) -> Result<RowRegistry> {
        let mut next = IndexMap::with_capacity(rows.len());

        for (index, row) in rows.into_iter().enumerate() {
            let id = self
                .id_accessor
                .resolve(&row)
                .ok_or(PipelineError::MissingRowId { index })?;
            if next.contains_key(&id) {
                return Err(PipelineError::DuplicateRowId(id));
            }
            next.insert(id, row);
        }

        Ok(RowRegistry {
            rows: next,
            id_accessor: self.id_accessor.clone(),
        })
    }

    /// Replaces the whole row set.
    pub fn set_rows(&mut self, rows: Vec<RowRecord>) -> Result<()> {
        *self = self.with_rows(rows)?;
        Ok(())
    }

    /// Applies a batch of upserts and deletes, returning the updated registry.
    ///
    /// Upserts merge the given fields into the existing record and replace it.
    /// An upsert following a delete of the same id in one batch starts from an
    /// empty record instead, and counts as a single update.
    /// Deleting an unknown id is logged and skipped. The batch is validated
    /// before anything is applied, so a failing batch leaves no trace.
    pub fn with_updates(&self, updates: Vec<RowUpdate>) -> Result<(RowRegistry, UpdateSummary)> {
        let mut resolved = Vec::with_capacity(updates.len());
        for (index, update) in updates.into_iter().enumerate() {
            match update {
                RowUpdate::Upsert(partial) => {
                    let id = self
                        .id_accessor
                        .resolve(&partial)
                        .ok_or(PipelineError::MissingRowId { index })?;
                    resolved.push((id, Some(partial)));
                }
                RowUpdate::Delete(id) => resolved.push((id, None)),
            }
        }

        let mut next = self.clone();
        let mut summary = UpdateSummary::default();
        let mut deleted: HashSet<RowId> = HashSet::new();

        for (id, partial) in resolved {
            match partial {
                Some(partial) => {
                    if deleted.remove(&id) {
                        // Deleted earlier in this batch: the upsert replaces the record
                        summary.deleted -= 1;
                        summary.updated += 1;
                        next.rows.insert(id, partial);
                        continue;
                    }
                    match next.rows.get(&id) {
                        Some(existing) => {
                            let mut merged = existing.clone();
                            merged.extend(partial);
                            next.rows.insert(id, merged);
                            summary.updated += 1;
                        }
                        None => {
                            next.rows.insert(id, partial);
                            summary.inserted += 1;
                        }
                    }
                }
                None => {
                    if next.rows.contains_key(&id) && !deleted.contains(&id) {
                        deleted.insert(id);
                        summary.deleted += 1;
                    } else {
                        log::warn!("ignoring delete of unknown row id '{}'", id);
                    }
                }
            }
        }

        if !deleted.is_empty() {
            next.rows.retain(|id, _| !deleted.contains(id));
        }

        Ok((next, summary))
    }

    /// In-place variant of `with_updates`
    pub fn update_rows(&mut self, updates: Vec<RowUpdate>) -> Result<UpdateSummary> {
        let (next, summary) = self.with_updates(updates)?;
        *self = next;
        Ok(summary)
    }
}
