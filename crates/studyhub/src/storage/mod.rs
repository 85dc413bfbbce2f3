//! Persistent storage: the study database and document files

mod database;
mod files;

pub use database::StudyDb;
pub use files::{remove_quietly, sanitize_filename, DocumentFiles, DOCUMENTS_PREFIX};
