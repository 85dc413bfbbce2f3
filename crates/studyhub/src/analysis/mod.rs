//! Document analysis through an external program

mod executor;
mod types;

pub use executor::{AnalysisError, AnalysisExecutor, DocumentAnalyzer, RESULT_FILE_SUFFIX};
pub use types::{AnalysisResult, QuestionAnswer};
