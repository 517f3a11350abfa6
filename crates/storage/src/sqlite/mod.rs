use std::sync::Arc;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use thiserror::Error;

use crate::config::StoreConfig;
use crate::repository::{DocumentStore, Storage, ViewQuery};
use crate::views::{ViewDefinition, progress_views};

mod document_repo;
mod mapping;
mod migrate;
mod view_repo;

/// Document store persisted in `SQLite`.
///
/// Documents live as JSON text in `documents`; view rows are materialised in
/// `view_rows` and rewritten in the same transaction as the document they
/// were derived from.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
    views: Arc<Vec<ViewDefinition>>,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl SqliteRepository {
    /// Connect to `SQLite` using the given configuration.
    ///
    /// The repository is provisioned with the progress views; use
    /// [`SqliteRepository::with_views`] to index something else.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the connection cannot be established or if
    /// enforcing foreign key constraints fails during setup.
    pub async fn connect(config: &StoreConfig) -> Result<Self, SqliteInitError> {
        let mut options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout);
        if config.is_memory() {
            options = options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA journal_mode = WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 5000;")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.database_url)
            .await?;

        tracing::debug!(url = %config.database_url, "connected to sqlite");
        Ok(Self {
            pool,
            views: Arc::new(progress_views()),
        })
    }

    /// Replace the provisioned view definitions.
    ///
    /// Call [`SqliteRepository::rebuild_views`] afterwards if documents are
    /// already stored.
    #[must_use]
    pub fn with_views(mut self, views: impl IntoIterator<Item = ViewDefinition>) -> Self {
        self.views = Arc::new(views.into_iter().collect());
        self
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if migration queries fail.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }
}

impl Storage {
    /// Build a `Storage` backed by `SQLite`.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if connection or migrations cannot be
    /// completed.
    pub async fn sqlite(config: &StoreConfig) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::connect(config).await?;
        repo.migrate().await?;
        let documents: Arc<dyn DocumentStore> = Arc::new(repo.clone());
        let views: Arc<dyn ViewQuery> = Arc::new(repo);
        Ok(Self { documents, views })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SqliteRepository>();
    }
}
