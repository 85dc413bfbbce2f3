//! API routes for the study server

pub mod analysis;
pub mod chat;
pub mod studies;
pub mod users;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::error::Error;
use crate::server::state::AppState;
use crate::types::MAX_DOCUMENTS;

/// Routes mounted under `/studies`
pub fn study_routes(max_upload_size: usize) -> Router<AppState> {
    // Multipart framing overhead on top of the raw file bytes
    let single_upload_limit = max_upload_size + 64 * 1024;
    let study_upload_limit = max_upload_size * MAX_DOCUMENTS + 256 * 1024;

    Router::new()
        .route(
            "/",
            get(studies::list_studies)
                .post(studies::create_study)
                .layer(DefaultBodyLimit::max(study_upload_limit)),
        )
        .route(
            "/:id",
            get(studies::get_study)
                .put(studies::update_study)
                .delete(studies::delete_study)
                .layer(DefaultBodyLimit::max(study_upload_limit)),
        )
        // Async document analysis
        .route(
            "/analyze-document-async",
            post(analysis::submit_analysis).layer(DefaultBodyLimit::max(single_upload_limit)),
        )
        .route("/analysis-status/:id", get(analysis::analysis_status))
        .route("/analysis-jobs", get(analysis::list_analysis_jobs))
        // Chat
        .route("/chat-with-paper", post(chat::chat_with_paper))
}

/// Routes mounted under `/api`
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/my-studies", get(users::my_studies))
        .route("/my-studies/:id", get(users::my_study))
        .route("/info", get(info))
}

/// Map a multipart read failure, keeping the size-limit case distinct
pub(crate) fn multipart_error(err: MultipartError) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge(err.body_text())
    } else {
        Error::bad_request(format!("Failed to read multipart body: {}", err.body_text()))
    }
}

/// Parse a path id, rejecting malformed ones with 400
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(raw.trim()).map_err(|_| Error::bad_request(format!("Invalid {} ID format", what)))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "studyhub",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Research study submissions with asynchronous document analysis",
        "endpoints": {
            "GET /studies": "List approved studies (genre, title, page, limit)",
            "GET /studies/:id": "Get a study",
            "POST /studies": "Create a study (multipart, auth)",
            "PUT /studies/:id": "Update an owned study (multipart, auth)",
            "DELETE /studies/:id": "Delete an owned study (auth)",
            "POST /studies/analyze-document-async": "Submit a document for analysis (auth)",
            "GET /studies/analysis-status/:id": "Poll an analysis job (auth)",
            "GET /studies/analysis-jobs": "List analysis jobs (auth)",
            "POST /studies/chat-with-paper": "Ask a question about a study (auth)",
            "GET /api/my-studies": "List the caller's studies (auth)",
            "GET /api/my-studies/:id": "Get one of the caller's studies (auth)",
            "GET /documents/*": "Study document files",
            "GET /health": "Health check"
        }
    }))
}
