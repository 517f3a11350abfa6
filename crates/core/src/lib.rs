#![forbid(unsafe_code)]

pub mod mastery;
pub mod model;

pub use mastery::{AnswerOutcome, MasteryError};
