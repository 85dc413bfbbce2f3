//! Detached analysis runs

use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::registry::{JobRegistry, TransitionError};
use crate::analysis::DocumentAnalyzer;

/// Run the analyzer for a registered job on a background task.
///
/// The task is the only writer for `job_id`: it applies the outcome to the
/// registry exactly once. If the job was evicted meanwhile the outcome is dropped.
pub fn spawn_analysis(
    registry: Arc<JobRegistry>,
    analyzer: Arc<dyn DocumentAnalyzer>,
    job_id: Uuid,
) -> Option<JoinHandle<()>> {
    let source_path = registry.get(&job_id)?.source_path;

    Some(tokio::spawn(async move {
        let outcome = analyzer.analyze(&source_path).await;

        let applied = match outcome {
            Ok(result) => {
                let pairs = result.questions.len();
                registry.complete(job_id, result).map(|()| {
                    tracing::info!("Analysis job {} completed ({} pairs)", job_id, pairs);
                })
            }
            Err(e) => {
                tracing::error!("Analysis job {} failed: {}", job_id, e);
                registry.fail(job_id, e.to_string())
            }
        };

        match applied {
            Ok(()) => {}
            Err(TransitionError::NotFound(_)) => {
                tracing::warn!(
                    "Analysis job {} was evicted before {} finished; outcome discarded",
                    job_id,
                    analyzer.name()
                );
            }
            Err(e) => tracing::error!("Could not record outcome: {}", e),
        }
    }))
}
