mod ids;
mod level;
mod progress;

pub use ids::{DeckId, ParseIdError, ProgressId, Revision, UserId};
pub use level::{CardLevel, LevelError};
pub use progress::{NewProgress, Progress};
