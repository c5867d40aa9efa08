//! In-memory backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::batch::{Staged, WriteBatch};
use crate::change::{ChangeFeed, DocumentChange};
use crate::document::Document;
use crate::error::Result;
use crate::path::{CollectionPath, DocumentPath};
use crate::query::Query;
use crate::DocumentStore;

/// Document store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<DocumentPath, Document>>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            feed: ChangeFeed::with_capacity(capacity),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    fn collect_in(&self, collection: &CollectionPath, query: Option<&Query>) -> Vec<Document> {
        let docs = self.docs.read();
        let mut out: Vec<Document> = docs
            .values()
            .filter(|doc| &doc.path.parent() == collection)
            .filter(|doc| query.is_none_or(|q| q.matches(&doc.fields)))
            .cloned()
            .collect();
        if let Some(limit) = query.and_then(Query::max_results) {
            out.truncate(limit);
        }
        out
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        Ok(self.docs.read().get(path).cloned())
    }

    async fn list(&self, collection: &CollectionPath) -> Result<Vec<Document>> {
        Ok(self.collect_in(collection, None))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(self.collect_in(query.collection(), Some(query)))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let changes: Vec<DocumentChange> = {
            let mut docs = self.docs.write();
            let mut staged = Staged::new(Utc::now());

            for op in batch.ops() {
                let path = op.path();
                if !staged.is_loaded(path) {
                    staged.load(path.clone(), docs.get(path).cloned());
                }
                staged.apply(op)?;
            }

            for (path, after) in staged.writes() {
                match after {
                    Some(doc) => {
                        docs.insert(path.clone(), doc.clone());
                    }
                    None => {
                        docs.remove(path);
                    }
                }
            }
            staged.into_changes()
        };

        self.feed.publish(changes);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.feed.subscribe()
    }
}
