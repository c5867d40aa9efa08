//! Atomic write batches and the staging logic shared by the backends.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::change::DocumentChange;
use crate::document::{Document, Fields};
use crate::error::{Result, StoreError};
use crate::path::DocumentPath;
use crate::transform::{Precondition, Updates};

/// One write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// Create a document; fails if it exists.
    Create { path: DocumentPath, fields: Fields },
    /// Overwrite (or merge into) a document, creating it if needed.
    Set {
        path: DocumentPath,
        fields: Fields,
        merge: bool,
    },
    /// Transform fields of an existing document.
    Update {
        path: DocumentPath,
        updates: Updates,
        precondition: Option<Precondition>,
    },
    /// Delete a document; deleting a missing document is a no-op.
    Delete { path: DocumentPath },
}

impl BatchOp {
    pub fn path(&self) -> &DocumentPath {
        match self {
            Self::Create { path, .. }
            | Self::Set { path, .. }
            | Self::Update { path, .. }
            | Self::Delete { path } => path,
        }
    }

    /// Compute the next state of the document from its current state.
    fn apply(&self, current: Option<&Fields>, now: DateTime<Utc>) -> Result<Option<Fields>> {
        match self {
            Self::Create { path, fields } => {
                if current.is_some() {
                    return Err(StoreError::AlreadyExists(path.to_string()));
                }
                Ok(Some(fields.clone()))
            }
            Self::Set {
                fields,
                merge: false,
                ..
            } => Ok(Some(fields.clone())),
            Self::Set {
                fields,
                merge: true,
                ..
            } => {
                let mut next = current.cloned().unwrap_or_default();
                for (key, value) in fields {
                    next.insert(key.clone(), value.clone());
                }
                Ok(Some(next))
            }
            Self::Update {
                path,
                updates,
                precondition,
            } => {
                let Some(current) = current else {
                    return Err(StoreError::NotFound(path.to_string()));
                };
                if let Some(precondition) = precondition
                    && !precondition.holds(Some(current))
                {
                    return Err(StoreError::PreconditionFailed(path.to_string()));
                }
                let mut next = current.clone();
                updates.apply_to(&mut next, now);
                Ok(Some(next))
            }
            Self::Delete { .. } => Ok(None),
        }
    }
}

/// Ordered list of writes committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, path: DocumentPath, fields: Fields) -> &mut Self {
        self.ops.push(BatchOp::Create { path, fields });
        self
    }

    pub fn set(&mut self, path: DocumentPath, fields: Fields, merge: bool) -> &mut Self {
        self.ops.push(BatchOp::Set {
            path,
            fields,
            merge,
        });
        self
    }

    pub fn update(&mut self, path: DocumentPath, updates: Updates) -> &mut Self {
        self.ops.push(BatchOp::Update {
            path,
            updates,
            precondition: None,
        });
        self
    }

    pub fn update_if(
        &mut self,
        path: DocumentPath,
        precondition: Precondition,
        updates: Updates,
    ) -> &mut Self {
        self.ops.push(BatchOp::Update {
            path,
            updates,
            precondition: Some(precondition),
        });
        self
    }

    pub fn delete(&mut self, path: DocumentPath) -> &mut Self {
        self.ops.push(BatchOp::Delete { path });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

struct StagedEntry {
    before: Option<Document>,
    after: Option<Document>,
}

/// In-flight state of a batch: the first "before" and latest "after" per path.
pub(crate) struct Staged {
    now: DateTime<Utc>,
    order: Vec<DocumentPath>,
    entries: HashMap<DocumentPath, StagedEntry>,
}

impl Staged {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    pub(crate) fn is_loaded(&self, path: &DocumentPath) -> bool {
        self.entries.contains_key(path)
    }

    /// Record the committed state of a document before the batch touches it.
    pub(crate) fn load(&mut self, path: DocumentPath, current: Option<Document>) {
        self.order.push(path.clone());
        self.entries.insert(
            path,
            StagedEntry {
                before: current.clone(),
                after: current,
            },
        );
    }

    /// Apply one op on top of the staged state. The path must be loaded.
    pub(crate) fn apply(&mut self, op: &BatchOp) -> Result<()> {
        let path = op.path();
        let entry = self
            .entries
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        let now = self.now;
        let create_time = entry.after.as_ref().map_or(now, |d| d.create_time);
        let next = op.apply(entry.after.as_ref().map(|d| &d.fields), now)?;
        entry.after = next.map(|fields| Document {
            path: path.clone(),
            fields,
            create_time,
            update_time: now,
        });
        Ok(())
    }

    /// Final state to persist, per touched path, in first-touch order.
    pub(crate) fn writes(&self) -> impl Iterator<Item = (&DocumentPath, Option<&Document>)> {
        self.order.iter().filter_map(|path| {
            let entry = self.entries.get(path)?;
            if entry.before.is_none() && entry.after.is_none() {
                return None;
            }
            Some((path, entry.after.as_ref()))
        })
    }

    /// Change notifications for the committed batch.
    pub(crate) fn into_changes(mut self) -> Vec<DocumentChange> {
        let mut changes = Vec::with_capacity(self.order.len());
        for path in self.order {
            let Some(entry) = self.entries.remove(&path) else {
                continue;
            };
            if entry.before.is_none() && entry.after.is_none() {
                continue;
            }
            changes.push(DocumentChange {
                path,
                before: entry.before,
                after: entry.after,
                committed_at: self.now,
            });
        }
        changes
    }
}
