//! Analysis payload types

use serde::{Deserialize, Serialize};

/// A single extracted question with its answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

/// Normalized result of a document analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub brief_description: String,
    pub genres: Vec<String>,
    /// Question/answer pairs in batch order
    pub questions: Vec<QuestionAnswer>,
}

/// Result file written by the analysis program
#[derive(Debug, Deserialize)]
pub(crate) struct RawAnalysisOutput {
    pub extracted_metadata: RawMetadata,
    /// Batch key → pairs. Key order in the file is the batch order.
    #[serde(default)]
    pub answer_batches: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub processed_text_file_source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub brief_description: Option<String>,
    #[serde(default)]
    pub genres: Option<serde_json::Value>,
}

impl RawAnalysisOutput {
    /// Flatten batches and normalize metadata
    pub(crate) fn into_result(self) -> Result<AnalysisResult, String> {
        let mut questions = Vec::new();
        for (batch_key, batch) in self.answer_batches {
            let pairs: Vec<QuestionAnswer> = serde_json::from_value(batch)
                .map_err(|e| format!("batch '{}' is not a list of question/answer pairs: {}", batch_key, e))?;
            questions.extend(pairs);
        }

        let meta = self.extracted_metadata;
        Ok(AnalysisResult {
            title: meta.title.unwrap_or_default(),
            abstract_text: meta.abstract_text.unwrap_or_default(),
            brief_description: meta.brief_description.unwrap_or_default(),
            genres: normalize_genres(meta.genres),
            questions,
        })
    }
}

/// Genres may arrive as a list, a comma separated string, or be missing
fn normalize_genres(value: Option<serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(serde_json::Value::String(s)) => s
            .split(',')
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
