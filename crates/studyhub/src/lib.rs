//! studyhub: research study submissions with asynchronous document analysis
//!
//! Researchers upload a document, an external analysis program extracts
//! metadata and question/answer pairs in the background, and the client polls
//! for the outcome before filing the study.

pub mod activity;
pub mod analysis;
pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod jobs;
pub mod server;
pub mod storage;
pub mod types;

pub use config::StudyHubConfig;
pub use error::{Error, Result};
pub use server::StudyHubServer;
pub use types::study::{StudyDocument, StudyRecord};
