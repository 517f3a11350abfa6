use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::document::{ID_FIELD, REV_FIELD, stamp};
use crate::keys::{ViewKey, ViewName, ViewRow};
use crate::repository::{DocumentMeta, DocumentStore, StorageError, ViewQuery};
use crate::views::{ViewDefinition, progress_views};

/// Simple in-memory document store for testing and prototyping.
///
/// Views are evaluated on every query by mapping over the documents in id
/// order, so they can never drift from the stored data.
#[derive(Clone)]
pub struct InMemoryStore {
    documents: Arc<Mutex<BTreeMap<String, Value>>>,
    views: Arc<HashMap<ViewName, ViewDefinition>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// A store provisioned with the progress views.
    #[must_use]
    pub fn new() -> Self {
        Self::with_views(progress_views())
    }

    #[must_use]
    pub fn with_views(views: impl IntoIterator<Item = ViewDefinition>) -> Self {
        Self {
            documents: Arc::new(Mutex::new(BTreeMap::new())),
            views: Arc::new(views.into_iter().map(|v| (v.name, v)).collect()),
        }
    }

    /// Number of stored documents.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StorageError> {
        let guard = self
            .documents
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.len())
    }

    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.len().map(|n| n == 0)
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn fetch_by_id(&self, id: &str) -> Result<Option<Value>, StorageError> {
        let guard = self
            .documents
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn insert(&self, document: Value) -> Result<DocumentMeta, StorageError> {
        let mut guard = self
            .documents
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let requested_id = document.get(ID_FIELD).and_then(Value::as_str);
        let current_rev = requested_id
            .and_then(|id| guard.get(id))
            .and_then(|doc| doc.get(REV_FIELD))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let stamped = stamp(document, current_rev.as_deref())?;
        tracing::debug!(id = %stamped.id, rev = %stamped.rev, "stored document");
        guard.insert(stamped.id.clone(), stamped.body);
        Ok(DocumentMeta {
            id: stamped.id,
            rev: stamped.rev,
        })
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut guard = self
            .documents
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(id).map(|_| ()).ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl ViewQuery for InMemoryStore {
    async fn query_view_by_key(
        &self,
        view: &ViewName,
        key: &ViewKey,
    ) -> Result<Vec<ViewRow>, StorageError> {
        let definition = self
            .views
            .get(view)
            .ok_or_else(|| StorageError::UnknownView(view.to_string()))?;
        let guard = self
            .documents
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut rows = Vec::new();
        for (id, document) in guard.iter() {
            for (emitted, value) in definition.emit(document) {
                if key.matches(&emitted) {
                    rows.push(ViewRow {
                        id: id.clone(),
                        key: emitted,
                        value,
                    });
                }
            }
        }
        Ok(rows)
    }
}
