//! Runs the external analysis program over a stored document
//!
//! Protocol with the program:
//! - request: `<program> <leading args..> <document> <output flag> <output dir>`
//! - response signal: process exit
//! - response body: `<output dir>/<document stem>_qna_data_batched.json`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

use super::types::{AnalysisResult, RawAnalysisOutput};
use crate::config::AnalysisConfig;

/// Suffix the analysis program appends to the document stem
pub const RESULT_FILE_SUFFIX: &str = "_qna_data_batched.json";

/// Why an analysis run failed. The `Display` text is what a polling client sees.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The document handed to the executor does not exist
    #[error("Document not found at {0}")]
    MissingDocument(PathBuf),

    /// The program could not be started
    #[error("Failed to start analysis program '{program}': {message}")]
    Spawn { program: String, message: String },

    /// The program exited with a non-zero status
    #[error("Analysis program exited with {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },

    /// The program succeeded but left no result file
    #[error("Analysis result file not found at {path}. stderr: {stderr}")]
    MissingOutput { path: PathBuf, stderr: String },

    /// The result file could not be read or parsed
    #[error("Failed to parse analysis result {path}: {message}")]
    Unparseable { path: PathBuf, message: String },
}

/// Something that turns a stored document into an [`AnalysisResult`]
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Analyze the document at `document_path`
    async fn analyze(&self, document_path: &Path) -> Result<AnalysisResult, AnalysisError>;

    /// Name for logging
    fn name(&self) -> &str;
}

/// External-process analyzer
pub struct AnalysisExecutor {
    config: AnalysisConfig,
}

impl AnalysisExecutor {
    /// Create a new executor
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Location of the result file for a document
    pub fn result_path(&self, document_path: &Path) -> PathBuf {
        let stem = document_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        self.config
            .output_dir
            .join(format!("{}{}", stem, RESULT_FILE_SUFFIX))
    }

    fn build_command(&self, document_path: &Path) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.leading_args)
            .arg(document_path)
            .arg(&self.config.output_dir_flag)
            .arg(&self.config.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Intermediate artifacts may be reported relative to the output directory
    fn resolve_artifact(&self, reported: &str) -> PathBuf {
        let path = PathBuf::from(reported);
        if path.is_absolute() {
            path
        } else {
            self.config.output_dir.join(path)
        }
    }

    async fn remove_quietly(path: &Path, what: &str) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to delete {} {}: {}", what, path.display(), e);
            }
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for AnalysisExecutor {
    async fn analyze(&self, document_path: &Path) -> Result<AnalysisResult, AnalysisError> {
        if !tokio::fs::try_exists(document_path).await.unwrap_or(false) {
            return Err(AnalysisError::MissingDocument(document_path.to_path_buf()));
        }

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| AnalysisError::Spawn {
                program: self.config.program.clone(),
                message: format!(
                    "cannot create output dir {}: {}",
                    self.config.output_dir.display(),
                    e
                ),
            })?;

        tracing::info!(
            "Running analysis program '{}' on {}",
            self.config.program,
            document_path.display()
        );

        let output = self
            .build_command(document_path)
            .output()
            .await
            .map_err(|e| AnalysisError::Spawn {
                program: self.config.program.clone(),
                message: e.to_string(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            tracing::debug!("Analysis stderr for {}: {}", document_path.display(), stderr);
        }

        if !output.status.success() {
            Self::remove_quietly(&self.result_path(document_path), "analysis result").await;
            return Err(AnalysisError::NonZeroExit {
                status: output.status.to_string(),
                stderr,
            });
        }

        let result_path = self.result_path(document_path);
        let content = match tokio::fs::read_to_string(&result_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AnalysisError::MissingOutput {
                    path: result_path,
                    stderr,
                });
            }
            Err(e) => {
                return Err(AnalysisError::Unparseable {
                    path: result_path,
                    message: e.to_string(),
                });
            }
        };

        let parsed = serde_json::from_str::<RawAnalysisOutput>(&content)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                let artifact = raw.processed_text_file_source.clone();
                raw.into_result().map(|result| (result, artifact))
            });

        // The result file is consumed either way
        Self::remove_quietly(&result_path, "analysis result").await;

        let (result, artifact) = parsed.map_err(|message| AnalysisError::Unparseable {
            path: result_path.clone(),
            message,
        })?;

        if let Some(artifact) = artifact.filter(|a| !a.trim().is_empty()) {
            let artifact_path = self.resolve_artifact(&artifact);
            Self::remove_quietly(&artifact_path, "intermediate artifact").await;
        }

        tracing::info!(
            "Analysis of {} produced {} question/answer pairs",
            document_path.display(),
            result.questions.len()
        );

        Ok(result)
    }

    fn name(&self) -> &str {
        &self.config.program
    }
}
