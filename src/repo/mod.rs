//! Persistence and data-source boundaries

pub mod source;
pub mod store;

pub use source::{InMemoryRecordSource, JsonFileRecordSource, RecordSource};
pub use store::{CurrentModelDoc, ModelStore};
