//! Asynchronous document analysis jobs
//!
//! A job is created pending when a document is submitted, reaches `completed`
//! or `failed` once its analysis finishes, and is evicted by the sweeper after
//! the retention window.

mod registry;
mod runner;
mod sweeper;

pub use registry::{AnalysisJob, JobRegistry, JobState, JobStats, JobStatus, TransitionError};
pub use runner::spawn_analysis;
pub use sweeper::{JobSweeper, SweepReport, SweeperHandle};
