//! Secondary indexes over progress documents.
//!
//! Each view is a pure map from one stored document to the `(key, value)`
//! rows it contributes, so every index can be rebuilt from the documents
//! alone.

use serde_json::{Value, json};

use crate::document::{ID_FIELD, ProgressDocument};
use crate::keys::ViewName;

/// `[user, deck]` → record id
pub const PROGRESS_BY_USER_DECK: ViewName = ViewName::new("progress", "by-user-deck");
/// `user` → record id
pub const PROGRESS_BY_USER: ViewName = ViewName::new("progress", "by-user");
/// `[user, deck, card_index]` → card level
pub const LEVEL_BY_CARD: ViewName = ViewName::new("cards", "level-by-card");
/// `deck` → record id
pub const PROGRESS_BY_DECK: ViewName = ViewName::new("progress", "by-deck");

pub type MapFn = fn(&Value) -> Vec<(Value, Value)>;

#[derive(Clone, Copy)]
pub struct ViewDefinition {
    pub name: ViewName,
    pub map: MapFn,
}

impl ViewDefinition {
    #[must_use]
    pub fn emit(&self, document: &Value) -> Vec<(Value, Value)> {
        (self.map)(document)
    }
}

impl std::fmt::Debug for ViewDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewDefinition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The four indexes the progress access layer relies on.
#[must_use]
pub fn progress_views() -> Vec<ViewDefinition> {
    vec![
        ViewDefinition {
            name: PROGRESS_BY_USER_DECK,
            map: by_user_deck,
        },
        ViewDefinition {
            name: PROGRESS_BY_USER,
            map: by_user,
        },
        ViewDefinition {
            name: LEVEL_BY_CARD,
            map: level_by_card,
        },
        ViewDefinition {
            name: PROGRESS_BY_DECK,
            map: by_deck,
        },
    ]
}

// Documents that are not progress records contribute nothing.
fn progress_of(document: &Value) -> Option<(ProgressDocument, Value)> {
    let id = document.get(ID_FIELD)?.clone();
    let progress = ProgressDocument::from_value(document.clone()).ok()?;
    Some((progress, id))
}

fn by_user_deck(document: &Value) -> Vec<(Value, Value)> {
    progress_of(document)
        .map(|(p, id)| vec![(json!([p.user, p.deck]), id)])
        .unwrap_or_default()
}

fn by_user(document: &Value) -> Vec<(Value, Value)> {
    progress_of(document)
        .map(|(p, id)| vec![(json!(p.user), id)])
        .unwrap_or_default()
}

fn level_by_card(document: &Value) -> Vec<(Value, Value)> {
    let Some((p, _)) = progress_of(document) else {
        return Vec::new();
    };
    p.card_levels
        .iter()
        .enumerate()
        .map(|(index, level)| (json!([&p.user, &p.deck, index]), json!(level.value())))
        .collect()
}

fn by_deck(document: &Value) -> Vec<(Value, Value)> {
    progress_of(document)
        .map(|(p, id)| vec![(json!(p.deck), id)])
        .unwrap_or_default()
}
