//! Persisted JSON shape of progress records and the write stamping shared by
//! every store backend.

use kasten_core::model::{CardLevel, DeckId, NewProgress, Progress, ProgressId, Revision, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::repository::StorageError;

pub(crate) const ID_FIELD: &str = "_id";
pub(crate) const REV_FIELD: &str = "_rev";

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Persisted shape for a progress record.
///
/// This mirrors the domain `Progress` so the access layer can map documents
/// without leaking JSON concerns into the domain crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDocument {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub user: String,
    pub deck: String,
    pub card_levels: Vec<CardLevel>,
}

impl ProgressDocument {
    #[must_use]
    pub fn from_new(progress: &NewProgress) -> Self {
        Self {
            id: None,
            rev: None,
            user: progress.user.value().to_owned(),
            deck: progress.deck.value().to_owned(),
            card_levels: progress.card_levels.clone(),
        }
    }

    #[must_use]
    pub fn from_progress(progress: &Progress) -> Self {
        Self {
            id: Some(progress.id().value().to_owned()),
            rev: Some(progress.revision().value().to_owned()),
            user: progress.user().value().to_owned(),
            deck: progress.deck().value().to_owned(),
            card_levels: progress.card_levels().to_vec(),
        }
    }

    /// Decode a stored document.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if fields are missing or a card
    /// level is outside `0..=4`.
    pub fn from_value(value: Value) -> Result<Self, StorageError> {
        serde_json::from_value(value).map_err(ser)
    }

    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if encoding fails.
    pub fn to_value(&self) -> Result<Value, StorageError> {
        serde_json::to_value(self).map_err(ser)
    }

    /// Convert the document back into a domain `Progress`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the store did not stamp the
    /// document with an id and revision.
    pub fn into_progress(self) -> Result<Progress, StorageError> {
        let id = self
            .id
            .ok_or_else(|| StorageError::Serialization("missing _id".into()))?;
        let rev = self
            .rev
            .ok_or_else(|| StorageError::Serialization("missing _rev".into()))?;
        Ok(Progress::from_persisted(
            ProgressId::new(id),
            Revision::new(rev),
            UserId::new(self.user),
            DeckId::new(self.deck),
            self.card_levels,
        ))
    }
}

//
// ─── WRITE STAMPING ────────────────────────────────────────────────────────────
//

/// A document ready to be written: identity resolved, new revision applied.
#[derive(Debug, Clone)]
pub(crate) struct Stamped {
    pub id: String,
    pub rev: String,
    pub body: Value,
}

fn string_field(object: &Map<String, Value>, field: &str) -> Result<Option<String>, StorageError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(StorageError::Serialization(format!(
            "{field} must be a string, got {other}"
        ))),
    }
}

/// Resolve id and revision for a write against the currently stored revision.
///
/// Revisions look like `<generation>-<random>`; the generation counts writes.
pub(crate) fn stamp(document: Value, current_rev: Option<&str>) -> Result<Stamped, StorageError> {
    let Value::Object(mut object) = document else {
        return Err(StorageError::Serialization("document must be a JSON object".into()));
    };

    let id = match string_field(&object, ID_FIELD)? {
        Some(id) if !id.trim().is_empty() => id,
        Some(_) => return Err(StorageError::Serialization("_id cannot be empty".into())),
        None => Uuid::new_v4().simple().to_string(),
    };
    let supplied_rev = string_field(&object, REV_FIELD)?;

    if supplied_rev.as_deref() != current_rev {
        return Err(StorageError::Conflict);
    }

    let rev = next_revision(current_rev);
    object.insert(ID_FIELD.to_owned(), Value::String(id.clone()));
    object.insert(REV_FIELD.to_owned(), Value::String(rev.clone()));

    Ok(Stamped {
        id,
        rev,
        body: Value::Object(object),
    })
}

fn next_revision(current: Option<&str>) -> String {
    let generation = current
        .and_then(|rev| rev.split_once('-'))
        .and_then(|(n, _)| n.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_progress_has_no_identity() {
        let doc = ProgressDocument::from_new(&NewProgress::fresh(
            UserId::new("U1"),
            DeckId::new("D1"),
            2,
        ));
        let value = doc.to_value().unwrap();
        assert_eq!(value, json!({"user": "U1", "deck": "D1", "card_levels": [0, 0]}));
    }

    #[test]
    fn maps_stored_document_to_progress() {
        let value = json!({
            "_id": "p1", "_rev": "2-x", "user": "U1", "deck": "D1", "card_levels": [0, 3, 4]
        });
        let progress = ProgressDocument::from_value(value)
            .unwrap()
            .into_progress()
            .unwrap();
        assert_eq!(progress.id(), &ProgressId::new("p1"));
        assert_eq!(progress.revision(), &Revision::new("2-x"));
        assert_eq!(progress.level(1).map(CardLevel::value), Some(3));
    }

    #[test]
    fn rejects_level_out_of_range() {
        let value = json!({"_id": "p1", "_rev": "1-x", "user": "U", "deck": "D", "card_levels": [5]});
        assert!(matches!(
            ProgressDocument::from_value(value),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn unstamped_document_cannot_become_progress() {
        let doc = ProgressDocument {
            id: None,
            rev: None,
            user: "U".into(),
            deck: "D".into(),
            card_levels: vec![],
        };
        assert!(doc.into_progress().is_err());
    }

    #[test]
    fn stamp_assigns_id_and_first_revision() {
        let stamped = stamp(json!({"user": "U"}), None).unwrap();
        assert!(!stamped.id.is_empty());
        assert!(stamped.rev.starts_with("1-"));
        assert_eq!(stamped.body[ID_FIELD], json!(stamped.id));
        assert_eq!(stamped.body[REV_FIELD], json!(stamped.rev));
    }

    #[test]
    fn stamp_bumps_generation_on_matching_revision() {
        let stamped = stamp(json!({"_id": "p1", "_rev": "3-abc"}), Some("3-abc")).unwrap();
        assert_eq!(stamped.id, "p1");
        assert!(stamped.rev.starts_with("4-"));
    }

    #[test]
    fn stamp_rejects_stale_or_missing_revision() {
        assert!(matches!(
            stamp(json!({"_id": "p1", "_rev": "1-old"}), Some("2-new")),
            Err(StorageError::Conflict)
        ));
        assert!(matches!(
            stamp(json!({"_id": "p1"}), Some("2-new")),
            Err(StorageError::Conflict)
        ));
        assert!(matches!(
            stamp(json!({"_id": "gone", "_rev": "1-x"}), None),
            Err(StorageError::Conflict)
        ));
    }

    #[test]
    fn stamp_rejects_non_objects() {
        assert!(matches!(stamp(json!([1, 2]), None), Err(StorageError::Serialization(_))));
    }
}
