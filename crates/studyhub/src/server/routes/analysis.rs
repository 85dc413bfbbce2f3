//! Asynchronous document analysis endpoints

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{multipart_error, parse_id};
use crate::analysis::AnalysisResult;
use crate::auth::AuthUser;
use crate::error::{Error, Result};
use crate::jobs::{spawn_analysis, JobStats, JobStatus};
use crate::server::state::AppState;
use crate::storage::remove_quietly;

/// Multipart field carrying the document
pub const DOCUMENT_FIELD: &str = "document";

/// Response from a submission
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub message: String,
    pub analysis_id: Uuid,
}

/// Current view of one job
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub status: JobStatus,
    pub original_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One row of the job listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub analysis_id: Uuid,
    pub status: JobStatus,
    pub original_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub stats: JobStats,
}

/// POST /studies/analyze-document-async - Store a document and start analyzing it
pub async fn submit_analysis(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>)> {
    let max_size = state.config().server.max_upload_size;
    let mut stored: Option<(std::path::PathBuf, String)> = None;

    let outcome: Result<()> = async {
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() != Some(DOCUMENT_FIELD) {
                continue;
            }
            let Some(original_name) = field.file_name().map(|s| s.to_string()) else {
                continue;
            };
            if stored.is_some() {
                return Err(Error::bad_request("Only one document may be uploaded per analysis."));
            }

            let data = field.bytes().await.map_err(multipart_error)?;
            if data.len() > max_size {
                return Err(Error::PayloadTooLarge(format!(
                    "Document exceeds the {} byte upload limit",
                    max_size
                )));
            }

            let path = state
                .files()
                .store_upload(DOCUMENT_FIELD, &original_name, &data)
                .await?;
            stored = Some((path, original_name));
        }
        Ok(())
    }
    .await;

    let (path, original_name) = match (outcome, stored) {
        (Ok(()), Some(stored)) => stored,
        (Ok(()), None) => return Err(Error::bad_request("No document file uploaded.")),
        (Err(e), stored) => {
            if let Some((path, _)) = stored {
                remove_quietly(&path).await;
            }
            return Err(e);
        }
    };

    let job = state.jobs().create(path, original_name);
    tracing::info!(
        "Analysis job {} submitted by {} for {}",
        job.id,
        user.uid,
        job.original_name
    );
    spawn_analysis(state.jobs().clone(), state.analyzer().clone(), job.id);

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            message: "Document analysis started.".to_string(),
            analysis_id: job.id,
        }),
    ))
}

/// GET /studies/analysis-status/:id - Poll a job
pub async fn analysis_status(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(raw_id): Path<String>,
) -> Result<Json<JobView>> {
    let id = parse_id(&raw_id, "analysis")?;
    let job = state
        .jobs()
        .get(&id)
        .ok_or_else(|| Error::not_found("Analysis job"))?;

    tracing::debug!("Polled analysis job {} ({:?})", id, job.status());

    Ok(Json(JobView {
        status: job.status(),
        original_name: job.original_name.clone(),
        data: job.result().cloned(),
        error: job.error().map(str::to_string),
    }))
}

/// GET /studies/analysis-jobs - List jobs of this server lifetime
pub async fn list_analysis_jobs(State(state): State<AppState>, _user: AuthUser) -> Json<JobListResponse> {
    let jobs = state
        .jobs()
        .list()
        .into_iter()
        .map(|job| JobSummary {
            analysis_id: job.id,
            status: job.status(),
            original_name: job.original_name,
            created_at: job.created_at,
        })
        .collect();

    Json(JobListResponse {
        jobs,
        stats: state.jobs().stats(),
    })
}
