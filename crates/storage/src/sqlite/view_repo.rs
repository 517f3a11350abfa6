use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, decode_json, ser, write_view_rows};
use crate::keys::{ViewKey, ViewName, ViewRow};
use crate::repository::{StorageError, ViewQuery};

#[async_trait::async_trait]
impl ViewQuery for SqliteRepository {
    async fn query_view_by_key(
        &self,
        view: &ViewName,
        key: &ViewKey,
    ) -> Result<Vec<ViewRow>, StorageError> {
        if !self.views.iter().any(|v| v.name == *view) {
            return Err(StorageError::UnknownView(view.to_string()));
        }

        let rows = sqlx::query(
            r"
            SELECT doc_id, key, value
            FROM view_rows
            WHERE view = ?1 AND key = ?2
            ORDER BY doc_id ASC, seq ASC
            ",
        )
        .bind(view.to_string())
        .bind(key.canonical())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(ViewRow {
                id: row.try_get("doc_id").map_err(ser)?,
                key: decode_json("view key", &row.try_get::<String, _>("key").map_err(ser)?)?,
                value: decode_json(
                    "view value",
                    &row.try_get::<String, _>("value").map_err(ser)?,
                )?,
            });
        }
        Ok(out)
    }
}

impl SqliteRepository {
    /// Re-derive every view row from the stored documents.
    ///
    /// Returns the number of documents indexed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if reading documents or writing rows fails; the
    /// previous rows are kept in that case.
    pub async fn rebuild_views(&self) -> Result<usize, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query("DELETE FROM view_rows")
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        let documents = sqlx::query("SELECT id, body FROM documents ORDER BY id ASC")
            .fetch_all(&mut *tx)
            .await
            .map_err(conn)?;

        for row in &documents {
            let id: String = row.try_get("id").map_err(ser)?;
            let body = decode_json("document body", &row.try_get::<String, _>("body").map_err(ser)?)?;
            write_view_rows(&mut tx, &self.views, &id, &body).await?;
        }

        tx.commit().await.map_err(conn)?;
        tracing::info!(documents = documents.len(), "rebuilt view rows");
        Ok(documents.len())
    }
}
