//! Application state for the study server

use std::sync::Arc;

use crate::activity::ActivityLog;
use crate::analysis::{AnalysisExecutor, DocumentAnalyzer};
use crate::auth::{verifier_from_config, IdentityVerifier};
use crate::chat::ChatRunner;
use crate::config::StudyHubConfig;
use crate::error::{Error, Result};
use crate::jobs::JobRegistry;
use crate::storage::{DocumentFiles, StudyDb};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: StudyHubConfig,
    /// Analysis jobs of this server lifetime
    jobs: Arc<JobRegistry>,
    /// Document analyzer (external program)
    analyzer: Arc<dyn DocumentAnalyzer>,
    /// Bearer token verification
    verifier: Arc<dyn IdentityVerifier>,
    /// Study records
    db: StudyDb,
    /// Uploads and study documents on disk
    files: DocumentFiles,
    /// Click and chat logs
    activity: ActivityLog,
    /// Chat-with-paper program
    chat: ChatRunner,
}

/// Components that tests and embedders may swap out
pub struct StateParts {
    pub config: StudyHubConfig,
    pub analyzer: Arc<dyn DocumentAnalyzer>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub db: StudyDb,
}

impl AppState {
    /// Create application state from configuration
    pub async fn new(config: StudyHubConfig) -> Result<Self> {
        tracing::info!("Initializing application state...");

        let db = StudyDb::new(&config.storage.database_path)?;
        tracing::info!(
            "Study database opened at {} ({} studies)",
            config.storage.database_path.display(),
            db.count()?
        );

        let analyzer: Arc<dyn DocumentAnalyzer> = Arc::new(AnalysisExecutor::new(config.analysis.clone()));
        tracing::info!(
            "Analysis executor initialized (program: {}, output: {})",
            config.analysis.program,
            config.analysis.output_dir.display()
        );

        let verifier: Arc<dyn IdentityVerifier> = Arc::from(
            verifier_from_config(&config.auth, config.server.environment).map_err(|e| Error::Config(e.to_string()))?,
        );
        tracing::info!("Identity verifier initialized ({})", verifier.name());

        Self::from_parts(StateParts {
            config,
            analyzer,
            verifier,
            db,
        })
        .await
    }

    /// Assemble state from prepared components
    pub async fn from_parts(parts: StateParts) -> Result<Self> {
        let StateParts {
            config,
            analyzer,
            verifier,
            db,
        } = parts;

        let files = DocumentFiles::new(&config.storage.documents_dir, &config.storage.uploads_dir);
        files.ensure_dirs().await?;
        let activity = ActivityLog::new(&config.storage.logs_dir);
        let chat = ChatRunner::new(config.chat.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                jobs: Arc::new(JobRegistry::new()),
                analyzer,
                verifier,
                db,
                files,
                activity,
                chat,
            }),
        })
    }

    /// Get configuration
    pub fn config(&self) -> &StudyHubConfig {
        &self.inner.config
    }

    /// Get job registry
    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.inner.jobs
    }

    /// Get document analyzer
    pub fn analyzer(&self) -> &Arc<dyn DocumentAnalyzer> {
        &self.inner.analyzer
    }

    /// Get identity verifier
    pub fn verifier(&self) -> &Arc<dyn IdentityVerifier> {
        &self.inner.verifier
    }

    /// Get study database
    pub fn db(&self) -> &StudyDb {
        &self.inner.db
    }

    pub fn files(&self) -> &DocumentFiles {
        &self.inner.files
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.inner.activity
    }

    pub fn chat(&self) -> &ChatRunner {
        &self.inner.chat
    }
}
