use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::keys::{ViewKey, ViewName, ViewRow};
use crate::memory::InMemoryStore;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("unknown view: {0}")]
    UnknownView(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Identity of a stored document after a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    pub id: String,
    pub rev: String,
}

/// Document CRUD by id.
///
/// Documents are JSON objects carrying their identity in `_id` and `_rev`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id.
    ///
    /// Returns `Ok(None)` when no document has that id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be reached or the stored
    /// body cannot be decoded.
    async fn fetch_by_id(&self, id: &str) -> Result<Option<Value>, StorageError>;

    /// Insert or replace a document.
    ///
    /// Without `_id` a fresh id is assigned. With an `_id` that already
    /// exists the whole document is replaced, provided its `_rev` matches the
    /// stored revision.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` on a revision mismatch and
    /// `StorageError::Serialization` if the document is not a JSON object.
    async fn insert(&self, document: Value) -> Result<DocumentMeta, StorageError>;

    /// Delete a document by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn delete(&self, id: &str) -> Result<(), StorageError>;
}

/// Secondary-index lookups over documents.
#[async_trait]
pub trait ViewQuery: Send + Sync {
    /// All rows of `view` whose key equals `key`, ordered by document id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::UnknownView` if the view was never provisioned.
    async fn query_view_by_key(
        &self,
        view: &ViewName,
        key: &ViewKey,
    ) -> Result<Vec<ViewRow>, StorageError>;
}

/// Convenience container for wiring store handles.
#[derive(Clone)]
pub struct Storage {
    pub documents: Arc<dyn DocumentStore>,
    pub views: Arc<dyn ViewQuery>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let store = InMemoryStore::new();
        let documents: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let views: Arc<dyn ViewQuery> = Arc::new(store);
        Self { documents, views }
    }
}
