//! Local document files
//!
//! Uploads awaiting analysis go to the uploads directory under a generated
//! name. Study documents go to the documents directory under a sanitized form
//! of their display name and are referenced as `documents/<file>`.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{is_local_location, StudyDocument};

/// URL prefix and relative location prefix of study documents
pub const DOCUMENTS_PREFIX: &str = "documents";

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_.-]").expect("valid regex"));
static DOT_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\.+").expect("valid regex"));

/// Replace anything outside `[a-zA-Z0-9_.-]` with `_` and collapse dot runs
pub fn sanitize_filename(name: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(name, "_");
    DOT_RUNS.replace_all(&replaced, ".").into_owned()
}

/// Extension of `name` including the leading dot, or empty
fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Filesystem layout for uploads and study documents
#[derive(Debug, Clone)]
pub struct DocumentFiles {
    documents_dir: PathBuf,
    uploads_dir: PathBuf,
}

impl DocumentFiles {
    pub fn new(documents_dir: impl Into<PathBuf>, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            documents_dir: documents_dir.into(),
            uploads_dir: uploads_dir.into(),
        }
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Create both directories
    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.documents_dir).await?;
        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        Ok(())
    }

    /// Store an upload as `<field>-<millis>-<suffix><ext>` in the uploads directory
    pub async fn store_upload(&self, field: &str, original_name: &str, data: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        let name = format!(
            "{}-{}-{}{}",
            field,
            Utc::now().timestamp_millis(),
            &Uuid::new_v4().simple().to_string()[..10],
            sanitize_filename(&extension_of(original_name))
        );
        let path = self.uploads_dir.join(name);
        tokio::fs::write(&path, data).await?;
        tracing::debug!("Stored upload {} ({} bytes) at {}", original_name, data.len(), path.display());
        Ok(path)
    }

    /// Write a study document named after its display name.
    /// Names are claimed with `create_new`, so a taken name gets a numeric suffix
    /// and concurrent writers never share a file.
    pub async fn place_document(&self, display_name: &str, original_name: &str, data: &[u8]) -> Result<StudyDocument> {
        tokio::fs::create_dir_all(&self.documents_dir).await?;

        let stem = Path::new(display_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("document_{}", Utc::now().timestamp_millis()));
        let base = sanitize_filename(&stem);
        let ext = sanitize_filename(&extension_of(original_name));

        let mut file_name = format!("{}{}", base, ext);
        let mut attempt = 1;
        let mut file = loop {
            let open = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.documents_dir.join(&file_name))
                .await;
            match open {
                Ok(file) => break file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    file_name = format!("{}-{}{}", base, attempt, ext);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let path = self.documents_dir.join(&file_name);
        let written = async {
            file.write_all(data).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            remove_quietly(&path).await;
            return Err(e.into());
        }

        Ok(StudyDocument {
            display_name: display_name.to_string(),
            file_location: format!("{}/{}", DOCUMENTS_PREFIX, file_name),
            uploaded_at: Utc::now(),
        })
    }

    /// Disk path of a local `documents/<file>` location.
    /// Remote locations and anything escaping the documents directory yield `None`.
    pub fn resolve(&self, location: &str) -> Option<PathBuf> {
        if !is_local_location(location) {
            return None;
        }
        let relative = location
            .trim_start_matches('/')
            .strip_prefix(DOCUMENTS_PREFIX)?
            .strip_prefix('/')?;
        let file_name = Path::new(relative).file_name()?;
        if file_name != relative {
            return None;
        }
        Some(self.documents_dir.join(file_name))
    }

    /// Remove the local file behind a document location, logging failures
    pub async fn remove_location(&self, location: &str) -> bool {
        match self.resolve(location) {
            Some(path) => remove_quietly(&path).await,
            None => false,
        }
    }
}

/// Best-effort delete. Returns whether a file was removed.
pub async fn remove_quietly(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!("Failed to delete {}: {}", path.display(), e);
            false
        }
    }
}
