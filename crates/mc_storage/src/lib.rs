//! Durable records for the model service: SQLite rows for models and jobs,
//! and a content-addressed store for model artifacts.

pub mod cas;
pub mod schema;
pub mod store;

pub use cas::{CasError, CasStore};
pub use store::{JobRow, ModelRow, StorageError, Store};
