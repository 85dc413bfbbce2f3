//! Research study records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::analysis::QuestionAnswer;
use crate::error::{Error, Result};

/// Maximum number of documents attached to one study
pub const MAX_DOCUMENTS: usize = 5;

/// Patent status of the work behind a study
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatentStatus {
    Patented,
    Unpatented,
    #[serde(rename = "Patent Pending")]
    PatentPending,
}

impl PatentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatentStatus::Patented => "Patented",
            PatentStatus::Unpatented => "Unpatented",
            PatentStatus::PatentPending => "Patent Pending",
        }
    }

    /// Parse a form value; an empty value means no status
    pub fn parse_optional(value: &str) -> Result<Option<Self>> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("null") {
            return Ok(None);
        }
        value.parse().map(Some)
    }
}

impl fmt::Display for PatentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Patented" => Ok(PatentStatus::Patented),
            "Unpatented" => Ok(PatentStatus::Unpatented),
            "Patent Pending" => Ok(PatentStatus::PatentPending),
            other => Err(Error::validation(
                "patent_status",
                format!("'{}' is not one of Patented, Unpatented, Patent Pending", other),
            )),
        }
    }
}

/// Document attached to a study
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyDocument {
    pub display_name: String,
    /// Path relative to the server root (`documents/<file>`) or an absolute URL
    pub file_location: String,
    pub uploaded_at: DateTime<Utc>,
}

impl StudyDocument {
    /// Whether the document lives on this server's disk
    pub fn is_local(&self) -> bool {
        is_local_location(&self.file_location)
    }
}

/// Locations starting with `http` point elsewhere and are never touched on disk
pub fn is_local_location(location: &str) -> bool {
    !location.is_empty() && !location.starts_with("http")
}

/// A stored research study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyRecord {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub researcher_id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub brief_description: String,
    pub genres: Vec<String>,
    pub documents: Vec<StudyDocument>,
    pub patent_status: Option<PatentStatus>,
    pub questions: Vec<QuestionAnswer>,
    pub additional_info: serde_json::Value,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields of a new study
#[derive(Debug, Clone, Default)]
pub struct NewStudy {
    pub title: String,
    pub abstract_text: String,
    pub brief_description: String,
    pub genres: Vec<String>,
    pub documents: Vec<StudyDocument>,
    pub patent_status: Option<PatentStatus>,
    pub questions: Vec<QuestionAnswer>,
    pub additional_info: Option<serde_json::Value>,
}

impl StudyRecord {
    /// Build an unapproved study owned by `researcher_id`
    pub fn new(researcher_id: impl Into<String>, draft: NewStudy) -> Result<Self> {
        let now = Utc::now();
        let record = Self {
            id: Uuid::new_v4(),
            researcher_id: researcher_id.into(),
            title: draft.title.trim().to_string(),
            abstract_text: draft.abstract_text.trim().to_string(),
            brief_description: draft.brief_description.trim().to_string(),
            genres: draft.genres,
            documents: draft.documents,
            patent_status: draft.patent_status,
            questions: trim_questions(draft.questions),
            additional_info: object_or_empty(draft.additional_info),
            approved: false,
            created_at: now,
            updated_at: now,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.researcher_id == uid
    }

    /// Check field constraints before persisting
    pub fn validate(&self) -> Result<()> {
        if self.researcher_id.is_empty() {
            return Err(Error::validation("researcher_id", "is required"));
        }
        for (field, value) in [
            ("title", &self.title),
            ("abstract", &self.abstract_text),
            ("brief_description", &self.brief_description),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(field, "is required"));
            }
        }
        if self.documents.len() > MAX_DOCUMENTS {
            return Err(Error::validation(
                "documents",
                format!("Cannot exceed {} documents.", MAX_DOCUMENTS),
            ));
        }
        if self.documents.iter().any(|d| d.file_location.is_empty()) {
            return Err(Error::validation("documents", "file_location is required"));
        }
        if self
            .questions
            .iter()
            .any(|qa| qa.question.trim().is_empty() || qa.answer.trim().is_empty())
        {
            return Err(Error::validation("questions", "question and answer are required"));
        }
        if !self.additional_info.is_object() {
            return Err(Error::validation("additional_info", "must be an object"));
        }
        Ok(())
    }
}

pub(crate) fn trim_questions(questions: Vec<QuestionAnswer>) -> Vec<QuestionAnswer> {
    questions
        .into_iter()
        .map(|qa| QuestionAnswer {
            question: qa.question.trim().to_string(),
            answer: qa.answer.trim().to_string(),
        })
        .collect()
}

pub(crate) fn object_or_empty(value: Option<serde_json::Value>) -> serde_json::Value {
    match value {
        Some(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::Value::Object(Default::default()),
    }
}

/// Listing filter for studies
#[derive(Debug, Clone)]
pub struct StudyFilter {
    /// Only studies an administrator approved
    pub approved_only: bool,
    /// Only studies of this researcher
    pub researcher_id: Option<String>,
    /// Match any of these genres (case-insensitive substring)
    pub genres: Vec<String>,
    /// Case-insensitive title substring
    pub title: Option<String>,
    pub order: StudyOrder,
    /// 1-based page
    pub page: u32,
    pub limit: u32,
}

impl Default for StudyFilter {
    fn default() -> Self {
        Self {
            approved_only: false,
            researcher_id: None,
            genres: Vec::new(),
            title: None,
            order: StudyOrder::NewestCreated,
            page: 1,
            limit: 10,
        }
    }
}

impl StudyFilter {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }
}

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudyOrder {
    NewestCreated,
    RecentlyUpdated,
}

/// One page of studies
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPage {
    pub studies: Vec<StudyRecord>,
    pub total_pages: u64,
    pub current_page: u32,
    pub total_studies: u64,
}

impl StudyPage {
    pub fn new(studies: Vec<StudyRecord>, total: u64, filter: &StudyFilter) -> Self {
        let limit = u64::from(filter.limit.max(1));
        Self {
            studies,
            total_pages: total.div_ceil(limit),
            current_page: filter.page,
            total_studies: total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> NewStudy {
        NewStudy {
            title: "  Solar Cells ".into(),
            abstract_text: "Abstract".into(),
            brief_description: "Brief".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_study_defaults() {
        let study = StudyRecord::new("r1", draft()).unwrap();
        assert_eq!(study.title, "Solar Cells");
        assert!(!study.approved);
        assert_eq!(study.additional_info, serde_json::json!({}));
        assert!(study.patent_status.is_none());
    }

    #[test]
    fn test_required_fields() {
        let mut d = draft();
        d.brief_description = "   ".into();
        let err = StudyRecord::new("r1", d).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "brief_description"));
    }

    #[test]
    fn test_document_limit() {
        let mut d = draft();
        d.documents = (0..6)
            .map(|i| StudyDocument {
                display_name: format!("doc{}", i),
                file_location: format!("documents/doc{}.pdf", i),
                uploaded_at: Utc::now(),
            })
            .collect();
        assert!(StudyRecord::new("r1", d).is_err());
    }

    #[test]
    fn test_patent_status_serde() {
        assert_eq!(
            serde_json::to_value(PatentStatus::PatentPending).unwrap(),
            serde_json::json!("Patent Pending")
        );
        assert_eq!(PatentStatus::parse_optional("").unwrap(), None);
        assert_eq!(
            PatentStatus::parse_optional("Patented").unwrap(),
            Some(PatentStatus::Patented)
        );
        assert!(PatentStatus::parse_optional("Maybe").is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let study = StudyRecord::new("r1", draft()).unwrap();
        let value = serde_json::to_value(&study).unwrap();
        assert!(value.get("_id").is_some());
        assert_eq!(value["abstract"], "Abstract");
        assert_eq!(value["patent_status"], serde_json::Value::Null);
    }

    #[test]
    fn test_page_math() {
        let filter = StudyFilter {
            page: 2,
            limit: 10,
            ..Default::default()
        };
        assert_eq!(filter.offset(), 10);
        let page = StudyPage::new(vec![], 21, &filter);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.current_page, 2);
    }

    #[test]
    fn test_local_locations() {
        assert!(is_local_location("documents/a.pdf"));
        assert!(!is_local_location("https://cdn.example.org/a.pdf"));
        assert!(!is_local_location(""));
    }
}
