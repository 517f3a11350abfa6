use serde_json::Value;
use sqlx::SqliteConnection;

use crate::repository::StorageError;
use crate::views::ViewDefinition;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

pub(crate) fn decode_json(field: &'static str, raw: &str) -> Result<Value, StorageError> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::Serialization(format!("invalid {field}: {e}")))
}

/// Replace every view row derived from `doc_id` with the rows `body` emits now.
pub(crate) async fn write_view_rows(
    db: &mut SqliteConnection,
    views: &[ViewDefinition],
    doc_id: &str,
    body: &Value,
) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM view_rows WHERE doc_id = ?1")
        .bind(doc_id)
        .execute(&mut *db)
        .await
        .map_err(conn)?;

    for view in views {
        let name = view.name.to_string();
        for (seq, (key, value)) in view.emit(body).into_iter().enumerate() {
            let seq = i64::try_from(seq)
                .map_err(|_| StorageError::Serialization("view row overflow".into()))?;
            sqlx::query(
                r"
                INSERT INTO view_rows (view, key, doc_id, seq, value)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )
            .bind(&name)
            .bind(key.to_string())
            .bind(doc_id)
            .bind(seq)
            .bind(value.to_string())
            .execute(&mut *db)
            .await
            .map_err(conn)?;
        }
    }
    Ok(())
}
