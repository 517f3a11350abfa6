#![forbid(unsafe_code)]

pub mod error;
pub mod progress_service;

pub use error::ProgressError;
pub use progress_service::ProgressService;
