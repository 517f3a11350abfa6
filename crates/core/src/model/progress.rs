use crate::mastery::{AnswerOutcome, MasteryError, apply_answer};
use crate::model::ids::{DeckId, ProgressId, Revision, UserId};
use crate::model::level::CardLevel;

//
// ─── NEW PROGRESS ──────────────────────────────────────────────────────────────
//

/// A progress record that has not been stored yet.
///
/// The store assigns the id and first revision on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProgress {
    pub user: UserId,
    pub deck: DeckId,
    pub card_levels: Vec<CardLevel>,
}

impl NewProgress {
    /// A learner starting a deck: every card begins at level 0.
    #[must_use]
    pub fn fresh(user: UserId, deck: DeckId, card_count: usize) -> Self {
        Self {
            user,
            deck,
            card_levels: vec![CardLevel::ZERO; card_count],
        }
    }
}

//
// ─── PROGRESS ──────────────────────────────────────────────────────────────────
//

/// One learner's mastery state over one deck.
///
/// `user` and `deck` are fixed once the record exists, and the number of card
/// levels never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    id: ProgressId,
    revision: Revision,
    user: UserId,
    deck: DeckId,
    card_levels: Vec<CardLevel>,
}

impl Progress {
    /// Rehydrate a stored record.
    #[must_use]
    pub fn from_persisted(
        id: ProgressId,
        revision: Revision,
        user: UserId,
        deck: DeckId,
        card_levels: Vec<CardLevel>,
    ) -> Self {
        Self {
            id,
            revision,
            user,
            deck,
            card_levels,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ProgressId {
        &self.id
    }

    #[must_use]
    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    #[must_use]
    pub fn deck(&self) -> &DeckId {
        &self.deck
    }

    #[must_use]
    pub fn card_levels(&self) -> &[CardLevel] {
        &self.card_levels
    }

    #[must_use]
    pub fn card_count(&self) -> usize {
        self.card_levels.len()
    }

    #[must_use]
    pub fn level(&self, index: usize) -> Option<CardLevel> {
        self.card_levels.get(index).copied()
    }

    /// Number of cards at the top level.
    #[must_use]
    pub fn mastered_count(&self) -> usize {
        self.card_levels.iter().filter(|l| l.is_mastered()).count()
    }

    /// Record an answer for the card at `index` and return its new level.
    ///
    /// # Errors
    ///
    /// Returns `MasteryError::IndexOutOfRange` for an invalid index; the
    /// record is unchanged in that case.
    pub fn record_answer(
        &mut self,
        index: i64,
        outcome: AnswerOutcome,
    ) -> Result<CardLevel, MasteryError> {
        apply_answer(&mut self.card_levels, index, outcome)
    }
}
