//! Core record types

pub mod study;

pub use study::{
    is_local_location, NewStudy, PatentStatus, StudyDocument, StudyFilter, StudyOrder, StudyPage,
    StudyRecord, MAX_DOCUMENTS,
};
