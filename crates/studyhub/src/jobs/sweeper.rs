//! Periodic eviction of expired analysis jobs

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::registry::{AnalysisJob, JobRegistry};

/// Outcome of a single sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub files_removed: usize,
}

/// Evicts jobs older than the retention window and deletes their documents
pub struct JobSweeper {
    registry: Arc<JobRegistry>,
    interval: Duration,
    retention: Duration,
}

impl JobSweeper {
    pub fn new(registry: Arc<JobRegistry>, interval: Duration, retention: Duration) -> Self {
        Self {
            registry,
            interval,
            retention,
        }
    }

    /// Run one sweep now
    pub async fn sweep_once(&self) -> SweepReport {
        let evicted = self.registry.evict_older_than(self.retention);
        Self::clean_up(evicted).await
    }

    async fn clean_up(evicted: Vec<AnalysisJob>) -> SweepReport {
        let mut report = SweepReport {
            evicted: evicted.len(),
            files_removed: 0,
        };

        for job in evicted {
            match tokio::fs::remove_file(&job.source_path).await {
                Ok(()) => report.files_removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    "Failed to delete document {} of evicted job {}: {}",
                    job.source_path.display(),
                    job.id,
                    e
                ),
            }
            if !job.status().is_terminal() {
                tracing::warn!(
                    "Evicted analysis job {} ({}) while still pending",
                    job.id,
                    job.original_name
                );
            }
        }

        if report.evicted > 0 {
            tracing::info!(
                "Job sweep evicted {} jobs, removed {} documents",
                report.evicted,
                report.files_removed
            );
        }
        report
    }

    /// Start sweeping every interval on a background task
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            tracing::info!(
                "Job sweeper started (interval {:?}, retention {:?})",
                self.interval,
                self.retention
            );
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            timer.tick().await; // skip immediate first tick

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        self.sweep_once().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Job sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Running sweeper; stop it at shutdown
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Job sweeper task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sweep_removes_expired_jobs_and_files() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("doc.pdf");
        std::fs::write(&doc, b"pdf").unwrap();

        let registry = Arc::new(JobRegistry::new());
        let job = registry.create(doc.clone(), "doc.pdf");
        registry.fail(job.id, "boom").unwrap();

        let sweeper = JobSweeper::new(registry.clone(), Duration::from_secs(60), Duration::from_secs(3600));
        assert_eq!(sweeper.sweep_once().await, SweepReport::default());
        assert!(registry.get(&job.id).is_some());

        let sweeper = JobSweeper::new(registry.clone(), Duration::from_secs(60), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let report = sweeper.sweep_once().await;
        assert_eq!(report, SweepReport { evicted: 1, files_removed: 1 });
        assert!(registry.get(&job.id).is_none());
        assert!(!doc.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_an_error() {
        let registry = Arc::new(JobRegistry::new());
        registry.create(std::path::PathBuf::from("/nonexistent/doc.pdf"), "doc.pdf");

        let sweeper = JobSweeper::new(registry.clone(), Duration::from_secs(60), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let report = sweeper.sweep_once().await;
        assert_eq!(report, SweepReport { evicted: 1, files_removed: 0 });
    }

    #[tokio::test]
    async fn test_background_sweep_and_stop() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("pending.pdf");
        std::fs::write(&doc, b"pdf").unwrap();

        let registry = Arc::new(JobRegistry::new());
        let job = registry.create(doc.clone(), "pending.pdf");
        assert_eq!(registry.get(&job.id).unwrap().status(), JobStatus::Pending);

        let handle = JobSweeper::new(registry.clone(), Duration::from_millis(20), Duration::ZERO).start();

        let mut evicted = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if registry.get(&job.id).is_none() {
                evicted = true;
                break;
            }
        }
        handle.stop().await;

        assert!(evicted, "pending job should be evicted once expired");
        assert!(!doc.exists());
    }
}
