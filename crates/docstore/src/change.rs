//! Change feed: one event per document touched by a committed write.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::document::{Document, Fields};
use crate::path::DocumentPath;

/// Default change feed capacity.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// What a committed write did to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Prior and new content of a document after a committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub path: DocumentPath,
    pub before: Option<Document>,
    pub after: Option<Document>,
    pub committed_at: DateTime<Utc>,
}

impl DocumentChange {
    pub fn kind(&self) -> ChangeKind {
        match (&self.before, &self.after) {
            (None, _) => ChangeKind::Created,
            (Some(_), Some(_)) => ChangeKind::Updated,
            (Some(_), None) => ChangeKind::Deleted,
        }
    }

    pub fn before_fields(&self) -> Option<&Fields> {
        self.before.as_ref().map(|d| &d.fields)
    }

    pub fn after_fields(&self) -> Option<&Fields> {
        self.after.as_ref().map(|d| &d.fields)
    }
}

/// Broadcast sender shared by a store backend.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<DocumentChange>,
}

impl ChangeFeed {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.tx.subscribe()
    }

    pub fn publish(&self, changes: Vec<DocumentChange>) {
        for change in changes {
            // No receivers is fine: nobody is watching yet.
            let _ = self.tx.send(change);
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }
}
