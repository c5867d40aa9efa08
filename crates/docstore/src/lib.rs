//! Hierarchical JSON document store.
//!
//! Documents live at slash-separated paths (`collection/id/collection/id`) and
//! are written through atomic batches. Array union/remove transforms are applied
//! under the backend's write lock, so concurrent writers never lose each other's
//! elements. Every committed write is published on a change feed carrying the
//! before/after content of each touched document.
//!
//! Two backends are provided:
//! - [`MemoryStore`] for tests and ephemeral use
//! - [`SqliteStore`] backed by SQLite through sqlx

pub mod batch;
pub mod change;
pub mod document;
pub mod error;
pub mod memory;
pub mod path;
pub mod query;
pub mod sqlite;
pub mod transform;

pub use batch::{BatchOp, WriteBatch};
pub use change::{ChangeFeed, ChangeKind, DocumentChange};
pub use document::{Document, Fields, parse_timestamp, timestamp_value, to_fields};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use path::{CollectionPath, DocumentPath, PathParams, PathPattern};
pub use query::{Filter, Query};
pub use sqlite::SqliteStore;
pub use transform::{FieldTransform, Precondition, Updates};

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Generate a random document id.
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Document store operations.
///
/// Backends implement the read side plus [`DocumentStore::commit`]; single-document
/// writes are expressed as one-op batches.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>>;

    /// Documents directly inside `collection`, ordered by path.
    async fn list(&self, collection: &CollectionPath) -> Result<Vec<Document>>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Apply every op of the batch atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Subscribe to committed changes.
    fn subscribe(&self) -> broadcast::Receiver<DocumentChange>;

    async fn set(&self, path: &DocumentPath, fields: Fields, merge: bool) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.set(path.clone(), fields, merge);
        self.commit(batch).await
    }

    async fn create(&self, path: &DocumentPath, fields: Fields) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.create(path.clone(), fields);
        self.commit(batch).await
    }

    /// Create a document with a generated id.
    async fn add(&self, collection: &CollectionPath, fields: Fields) -> Result<DocumentPath> {
        let path = collection.doc(&new_document_id())?;
        self.create(&path, fields).await?;
        Ok(path)
    }

    /// Transform fields of an existing document; `NotFound` if it is missing.
    async fn update(&self, path: &DocumentPath, updates: Updates) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.update(path.clone(), updates);
        self.commit(batch).await
    }

    /// Conditional update. Returns `false` without writing when the document is
    /// missing or the precondition does not hold.
    async fn update_if(
        &self,
        path: &DocumentPath,
        precondition: Precondition,
        updates: Updates,
    ) -> Result<bool> {
        let mut batch = WriteBatch::new();
        batch.update_if(path.clone(), precondition, updates);
        match self.commit(batch).await {
            Ok(()) => Ok(true),
            Err(StoreError::PreconditionFailed(_) | StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, path: &DocumentPath) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(path.clone());
        self.commit(batch).await
    }
}
