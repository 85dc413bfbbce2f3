//! In-memory registry of analysis jobs
//!
//! Jobs live here only for their retention window. Nothing is persisted, so
//! job ids are valid for a single server lifetime.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::analysis::AnalysisResult;

/// Job status
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// Job state. The outcome payload only exists in its terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Completed(AnalysisResult),
    Failed(String),
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Pending => JobStatus::Pending,
            JobState::Completed(_) => JobStatus::Completed,
            JobState::Failed(_) => JobStatus::Failed,
        }
    }
}

/// One tracked document analysis
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub state: JobState,
    /// Uploaded document under analysis
    pub source_path: PathBuf,
    /// Name the caller uploaded the document as
    pub original_name: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match &self.state {
            JobState::Completed(result) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            JobState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Rejected state transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// No entry, either never issued or already evicted
    #[error("analysis job {0} is not registered")]
    NotFound(Uuid),

    /// The job already reached a terminal state
    #[error("analysis job {id} is already {status:?}")]
    AlreadyTerminal { id: Uuid, status: JobStatus },
}

/// Counts per status
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct JobStats {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Registry of analysis jobs keyed by id
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<Uuid, AnalysisJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending job for an already stored document
    pub fn create(&self, source_path: PathBuf, original_name: impl Into<String>) -> AnalysisJob {
        let job = AnalysisJob {
            id: Uuid::new_v4(),
            state: JobState::Pending,
            source_path,
            original_name: original_name.into(),
            created_at: Utc::now(),
            finished_at: None,
        };
        self.jobs.insert(job.id, job.clone());
        tracing::debug!("Registered analysis job {} ({})", job.id, job.original_name);
        job
    }

    /// Snapshot of a job. Reading never changes the entry.
    pub fn get(&self, id: &Uuid) -> Option<AnalysisJob> {
        self.jobs.get(id).map(|job| job.clone())
    }

    /// pending → completed
    pub fn complete(&self, id: Uuid, result: AnalysisResult) -> Result<(), TransitionError> {
        self.finish(id, JobState::Completed(result))
    }

    /// pending → failed
    pub fn fail(&self, id: Uuid, message: impl Into<String>) -> Result<(), TransitionError> {
        self.finish(id, JobState::Failed(message.into()))
    }

    fn finish(&self, id: Uuid, next: JobState) -> Result<(), TransitionError> {
        let mut job = self.jobs.get_mut(&id).ok_or(TransitionError::NotFound(id))?;
        if job.status().is_terminal() {
            return Err(TransitionError::AlreadyTerminal {
                id,
                status: job.status(),
            });
        }
        job.state = next;
        job.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Remove every job created more than `retention` before `now`, whatever its status
    pub fn evict_expired_at(&self, now: DateTime<Utc>, retention: chrono::Duration) -> Vec<AnalysisJob> {
        // Collect ids first so no shard lock is held while removing
        let expired: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|entry| now.signed_duration_since(entry.created_at) > retention)
            .map(|entry| *entry.key())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.jobs.remove(&id).map(|(_, job)| job))
            .collect()
    }

    /// Remove every job older than `retention`
    pub fn evict_older_than(&self, retention: std::time::Duration) -> Vec<AnalysisJob> {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        self.evict_expired_at(Utc::now(), retention)
    }

    /// All jobs, newest first
    pub fn list(&self) -> Vec<AnalysisJob> {
        let mut jobs: Vec<AnalysisJob> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn stats(&self) -> JobStats {
        let mut stats = JobStats::default();
        for entry in self.jobs.iter() {
            stats.total += 1;
            match entry.status() {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
