use serde_json::Value;

use super::SqliteRepository;
use super::mapping::{conn, decode_json, is_unique_violation, ser, write_view_rows};
use crate::document::{ID_FIELD, stamp};
use crate::repository::{DocumentMeta, DocumentStore, StorageError};

#[async_trait::async_trait]
impl DocumentStore for SqliteRepository {
    async fn fetch_by_id(&self, id: &str) -> Result<Option<Value>, StorageError> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        body.map(|raw| decode_json("document body", &raw)).transpose()
    }

    async fn insert(&self, document: Value) -> Result<DocumentMeta, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let requested_id = document
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_owned);
        let current_rev: Option<String> = match &requested_id {
            Some(id) => sqlx::query_scalar("SELECT rev FROM documents WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(conn)?,
            None => None,
        };

        let stamped = stamp(document, current_rev.as_deref())?;
        let body = serde_json::to_string(&stamped.body).map_err(ser)?;

        let written = match current_rev {
            // Guard on the revision we read so a concurrent writer cannot slip in between.
            Some(expected) => sqlx::query(
                r"
                UPDATE documents SET rev = ?1, body = ?2
                WHERE id = ?3 AND rev = ?4
                ",
            )
            .bind(&stamped.rev)
            .bind(&body)
            .bind(&stamped.id)
            .bind(expected)
            .execute(&mut *tx)
            .await,
            None => sqlx::query("INSERT INTO documents (id, rev, body) VALUES (?1, ?2, ?3)")
                .bind(&stamped.id)
                .bind(&stamped.rev)
                .bind(&body)
                .execute(&mut *tx)
                .await,
        };

        match written {
            Ok(res) if res.rows_affected() == 0 => return Err(StorageError::Conflict),
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StorageError::Conflict),
            Err(e) => return Err(conn(e)),
        }

        write_view_rows(&mut tx, &self.views, &stamped.id, &stamped.body).await?;
        tx.commit().await.map_err(conn)?;

        tracing::debug!(id = %stamped.id, rev = %stamped.rev, "stored document");
        Ok(DocumentMeta {
            id: stamped.id,
            rev: stamped.rev,
        })
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query("DELETE FROM view_rows WHERE doc_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        let res = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        tx.commit().await.map_err(conn)?;
        tracing::debug!(%id, "deleted document");
        Ok(())
    }
}
