#![forbid(unsafe_code)]

pub mod config;
pub mod document;
pub mod keys;
pub mod memory;
pub mod repository;
pub mod sqlite;
pub mod views;

pub use config::StoreConfig;
pub use keys::{ViewKey, ViewName, ViewRow};
pub use memory::InMemoryStore;
pub use repository::{DocumentMeta, DocumentStore, Storage, StorageError, ViewQuery};
