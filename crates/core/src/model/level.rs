use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LevelError {
    #[error("card level must be between 0 and 4, got {provided}")]
    OutOfRange { provided: i64 },
}

//
// ─── CARD LEVEL ───────────────────────────────────────────────────────────────
//

/// Mastery counter for a single card, always within `0..=4`.
///
/// A freshly started card sits at level 0. Each correct answer moves it one
/// level up until it reaches [`CardLevel::MAX`]; a wrong answer sends it back
/// to [`CardLevel::ZERO`]. The level doubles as the card's Leitner
/// compartment.
///
/// ```
/// # use kasten_core::model::CardLevel;
/// let level = CardLevel::new(3)?;
/// assert_eq!(level.promoted(), CardLevel::MAX);
/// assert_eq!(CardLevel::MAX.promoted(), CardLevel::MAX);
/// # Ok::<(), kasten_core::model::LevelError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct CardLevel(u8);

impl CardLevel {
    pub const MAX_VALUE: u8 = 4;
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(Self::MAX_VALUE);

    /// Build a level from a raw value.
    ///
    /// # Errors
    ///
    /// Returns `LevelError::OutOfRange` when `value > 4`.
    pub fn new(value: u8) -> Result<Self, LevelError> {
        Self::try_from(i64::from(value))
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    /// One level up, capped at [`CardLevel::MAX`].
    #[must_use]
    pub fn promoted(self) -> Self {
        Self(self.0.saturating_add(1).min(Self::MAX_VALUE))
    }

    #[must_use]
    pub fn is_mastered(self) -> bool {
        self == Self::MAX
    }
}

impl TryFrom<i64> for CardLevel {
    type Error = LevelError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= Self::MAX_VALUE)
            .map(Self)
            .ok_or(LevelError::OutOfRange { provided: value })
    }
}

impl From<CardLevel> for u8 {
    fn from(level: CardLevel) -> Self {
        level.0
    }
}

impl fmt::Display for CardLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
