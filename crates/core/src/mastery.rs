use thiserror::Error;

use crate::model::CardLevel;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MasteryError {
    #[error("card index {index} is out of range for {len} cards")]
    IndexOutOfRange { index: i64, len: usize },
}

//
// ─── ANSWER OUTCOME ────────────────────────────────────────────────────────────
//

/// Whether the learner answered a card correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Success,
    Failure,
}

impl From<bool> for AnswerOutcome {
    fn from(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

//
// ─── TRANSITIONS ───────────────────────────────────────────────────────────────
//

/// The per-card transition rule.
///
/// Success moves one level up and stays at the top once reached; failure
/// always drops back to zero. There is no time component.
///
/// ```
/// # use kasten_core::mastery::{next_level, AnswerOutcome};
/// # use kasten_core::model::CardLevel;
/// let level = CardLevel::new(2)?;
/// assert_eq!(next_level(level, AnswerOutcome::Success).value(), 3);
/// assert_eq!(next_level(level, AnswerOutcome::Failure), CardLevel::ZERO);
/// # Ok::<(), kasten_core::model::LevelError>(())
/// ```
#[must_use]
pub fn next_level(current: CardLevel, outcome: AnswerOutcome) -> CardLevel {
    match outcome {
        AnswerOutcome::Success => current.promoted(),
        AnswerOutcome::Failure => CardLevel::ZERO,
    }
}

/// Apply an answer to the card at `index`, leaving every other level as is.
///
/// `index` is signed because callers pass through whatever the learner's
/// client sent; negative values are rejected like any other out-of-range
/// index.
///
/// # Errors
///
/// Returns `MasteryError::IndexOutOfRange` unless `0 <= index < levels.len()`.
/// The slice is untouched on error.
pub fn apply_answer(
    levels: &mut [CardLevel],
    index: i64,
    outcome: AnswerOutcome,
) -> Result<CardLevel, MasteryError> {
    let len = levels.len();
    let slot = usize::try_from(index)
        .ok()
        .and_then(|i| levels.get_mut(i))
        .ok_or(MasteryError::IndexOutOfRange { index, len })?;

    *slot = next_level(*slot, outcome);
    Ok(*slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(raw: &[u8]) -> Vec<CardLevel> {
        raw.iter().map(|v| CardLevel::new(*v).unwrap()).collect()
    }

    fn raw(levels: &[CardLevel]) -> Vec<u8> {
        levels.iter().map(|l| l.value()).collect()
    }

    #[test]
    fn success_increments_every_level_up_to_cap() {
        for v in 0..=4_u8 {
            let next = next_level(CardLevel::new(v).unwrap(), AnswerOutcome::Success);
            assert_eq!(next.value(), (v + 1).min(4));
        }
    }

    #[test]
    fn failure_resets_every_level() {
        for v in 0..=4_u8 {
            let next = next_level(CardLevel::new(v).unwrap(), AnswerOutcome::Failure);
            assert_eq!(next, CardLevel::ZERO);
        }
    }

    #[test]
    fn five_successes_from_zero_reach_cap() {
        let mut cards = levels(&[0]);
        let seen: Vec<u8> = (0..5)
            .map(|_| apply_answer(&mut cards, 0, AnswerOutcome::Success).unwrap().value())
            .collect();
        assert_eq!(seen, vec![1, 2, 3, 4, 4]);
    }

    #[test]
    fn only_addressed_card_changes() {
        let mut cards = levels(&[3, 1, 4]);
        apply_answer(&mut cards, 1, AnswerOutcome::Success).unwrap();
        assert_eq!(raw(&cards), vec![3, 2, 4]);
        apply_answer(&mut cards, 2, AnswerOutcome::Failure).unwrap();
        assert_eq!(raw(&cards), vec![3, 2, 0]);
    }

    #[test]
    fn rejects_index_equal_to_len() {
        let mut cards = levels(&[1, 1, 1]);
        let err = apply_answer(&mut cards, 3, AnswerOutcome::Success).unwrap_err();
        assert_eq!(err, MasteryError::IndexOutOfRange { index: 3, len: 3 });
        assert_eq!(raw(&cards), vec![1, 1, 1]);
    }

    #[test]
    fn rejects_negative_index() {
        let mut cards = levels(&[2, 2]);
        let err = apply_answer(&mut cards, -1, AnswerOutcome::Failure).unwrap_err();
        assert_eq!(err, MasteryError::IndexOutOfRange { index: -1, len: 2 });
        assert_eq!(raw(&cards), vec![2, 2]);
    }

    #[test]
    fn bool_maps_to_outcome() {
        assert_eq!(AnswerOutcome::from(true), AnswerOutcome::Success);
        assert_eq!(AnswerOutcome::from(false), AnswerOutcome::Failure);
    }
}
