//! Study listing and management endpoints

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{multipart_error, parse_id};
use crate::analysis::{AnalysisResult, QuestionAnswer};
use crate::auth::AuthUser;
use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{
    is_local_location, NewStudy, PatentStatus, StudyDocument, StudyFilter, StudyPage, StudyRecord,
    MAX_DOCUMENTS,
};

/// Multipart field carrying study documents
pub const FILES_FIELD: &str = "study_document_files";

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

/// Client-side description of a document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentMeta {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub file_location: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

struct UploadedFile {
    original_name: String,
    data: Bytes,
}

/// Text fields and files of a study form
struct StudyForm {
    fields: HashMap<String, String>,
    files: Vec<UploadedFile>,
}

impl StudyForm {
    async fn read(multipart: &mut Multipart, max_file_size: usize) -> Result<Self> {
        let mut fields = HashMap::new();
        let mut files = Vec::new();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();

            if name == FILES_FIELD {
                let original_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                if original_name.is_empty() && data.is_empty() {
                    continue;
                }
                if data.len() > max_file_size {
                    return Err(Error::PayloadTooLarge(format!(
                        "{} exceeds the {} byte upload limit",
                        original_name, max_file_size
                    )));
                }
                if files.len() == MAX_DOCUMENTS {
                    return Err(Error::bad_request(format!(
                        "Cannot upload more than {} documents.",
                        MAX_DOCUMENTS
                    )));
                }
                files.push(UploadedFile { original_name, data });
            } else if !name.is_empty() {
                let value = field.text().await.map_err(multipart_error)?;
                fields.insert(name, value);
            }
        }

        Ok(Self { fields, files })
    }

    /// Raw value of a field, if sent
    fn raw(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Trimmed value of a field, `None` when absent or blank
    fn text(&self, name: &str) -> Option<&str> {
        self.raw(name).map(str::trim).filter(|v| !v.is_empty())
    }

    /// JSON value of a field; malformed JSON is a 400
    fn json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.text(name) {
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|_| Error::bad_request(format!("Invalid format for {}.", name))),
            None => Ok(None),
        }
    }

    /// JSON value of a field; malformed JSON is logged and treated as absent
    fn lenient_json<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let raw = self.text(name)?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring malformed {} field: {}", name, e);
                None
            }
        }
    }

    /// Genres as a JSON array, or a single plain genre
    fn genres(&self) -> Option<Vec<String>> {
        let raw = self.text("genres")?;
        let genres = match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s.trim().to_string()),
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Ok(serde_json::Value::String(s)) => vec![s.trim().to_string()],
            _ => vec![raw.to_string()],
        };
        Some(genres)
    }

    fn questions(&self) -> Option<Vec<QuestionAnswer>> {
        self.lenient_json("questions")
    }

    fn additional_info(&self) -> Option<serde_json::Value> {
        self.lenient_json::<serde_json::Value>("additional_info")
            .filter(|v| v.is_object())
    }

    /// `Some(None)` when the field was sent empty
    fn patent_status(&self) -> Result<Option<Option<PatentStatus>>> {
        self.raw("patent_status")
            .map(PatentStatus::parse_optional)
            .transpose()
    }
}

/// Move uploaded files into the documents directory.
/// On failure, every file placed so far is removed again.
async fn place_files(state: &AppState, files: &[UploadedFile], metadata: &[DocumentMeta]) -> Result<Vec<StudyDocument>> {
    let mut placed = Vec::with_capacity(files.len());
    for (i, file) in files.iter().enumerate() {
        let display_name = metadata
            .get(i)
            .and_then(|m| m.display_name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&file.original_name)
            .to_string();

        match state
            .files()
            .place_document(&display_name, &file.original_name, &file.data)
            .await
        {
            Ok(doc) => placed.push(doc),
            Err(e) => {
                discard_documents(state, &placed).await;
                return Err(e);
            }
        }
    }
    Ok(placed)
}

/// Remove the local files of documents
async fn discard_documents(state: &AppState, documents: &[StudyDocument]) {
    for doc in documents {
        state.files().remove_location(&doc.file_location).await;
    }
}

/// Remote documents described only by metadata
fn remote_documents(metadata: &[DocumentMeta]) -> Vec<StudyDocument> {
    metadata
        .iter()
        .filter_map(|m| {
            let location = m.file_location.as_deref()?.trim();
            if is_local_location(location) {
                tracing::warn!("Ignoring local document location {} without an upload", location);
                return None;
            }
            Some(StudyDocument {
                display_name: m
                    .display_name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "Untitled Document".to_string()),
                file_location: location.to_string(),
                uploaded_at: chrono::Utc::now(),
            })
        })
        .collect()
}

/// Completed analysis result named by the form's `analysis_id`, if any
fn analysis_prefill(state: &AppState, form: &StudyForm) -> Option<AnalysisResult> {
    let raw = form.text("analysis_id")?;
    let Ok(id) = uuid::Uuid::parse_str(raw) else {
        tracing::warn!("Ignoring malformed analysis_id {}", raw);
        return None;
    };
    let job = state.jobs().get(&id)?;
    match job.result() {
        Some(result) => Some(result.clone()),
        None => {
            tracing::debug!("Analysis {} is {:?}; nothing to prefill", id, job.status());
            None
        }
    }
}

/// GET /studies - Approved studies
pub async fn list_studies(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<StudyPage>> {
    let mut filter = StudyFilter {
        approved_only: true,
        limit: DEFAULT_PAGE_SIZE,
        ..Default::default()
    };

    for (key, value) in params {
        match key.as_str() {
            "genre" | "genre[]" => filter.genres.push(value),
            "title" => filter.title = Some(value),
            "page" => filter.page = value.parse().ok().filter(|p| *p > 0).unwrap_or(1),
            "limit" => {
                filter.limit = value
                    .parse()
                    .ok()
                    .filter(|l| *l > 0)
                    .unwrap_or(DEFAULT_PAGE_SIZE)
                    .min(MAX_PAGE_SIZE)
            }
            _ => {}
        }
    }

    let (studies, total) = state.db().search(&filter)?;
    Ok(Json(StudyPage::new(studies, total, &filter)))
}

/// GET /studies/:id - One study; counts as a click
pub async fn get_study(State(state): State<AppState>, Path(raw_id): Path<String>) -> Result<Json<StudyRecord>> {
    let id = parse_id(&raw_id, "study")?;
    let study = state.db().get(&id)?.ok_or_else(|| Error::not_found("Study"))?;

    state.activity().record_click(&study).await;
    Ok(Json(study))
}

/// POST /studies - Create a study
pub async fn create_study(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<StudyRecord>)> {
    let form = StudyForm::read(&mut multipart, state.config().server.max_upload_size).await?;

    let (Some(title), Some(abstract_text), Some(brief_description)) =
        (form.text("title"), form.text("abstract"), form.text("brief_description"))
    else {
        return Err(Error::bad_request(
            "Title, abstract, and brief description are required.",
        ));
    };

    let metadata: Vec<DocumentMeta> = form.json("documents_metadata")?.unwrap_or_default();
    let patent_status = form.patent_status()?.flatten();

    let prefill = analysis_prefill(&state, &form);
    let genres = form
        .genres()
        .filter(|g| !g.is_empty())
        .or_else(|| prefill.as_ref().map(|p| p.genres.clone()))
        .unwrap_or_default();
    let questions = form
        .questions()
        .filter(|q| !q.is_empty())
        .or_else(|| prefill.as_ref().map(|p| p.questions.clone()))
        .unwrap_or_default();

    let documents = if form.files.is_empty() {
        remote_documents(&metadata)
    } else {
        place_files(&state, &form.files, &metadata).await?
    };

    let draft = NewStudy {
        title: title.to_string(),
        abstract_text: abstract_text.to_string(),
        brief_description: brief_description.to_string(),
        genres,
        documents: documents.clone(),
        patent_status,
        questions,
        additional_info: form.additional_info(),
    };

    let stored = StudyRecord::new(&user.uid, draft).and_then(|study| {
        state.db().insert(&study)?;
        Ok(study)
    });

    match stored {
        Ok(study) => {
            tracing::info!(
                "Study {} created by {} with {} documents",
                study.id,
                user.uid,
                study.documents.len()
            );
            Ok((StatusCode::CREATED, Json(study)))
        }
        Err(e) => {
            discard_documents(&state, &documents).await;
            Err(e)
        }
    }
}

/// PUT /studies/:id - Update an owned study
pub async fn update_study(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(raw_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<StudyRecord>> {
    let id = parse_id(&raw_id, "study")?;
    let form = StudyForm::read(&mut multipart, state.config().server.max_upload_size).await?;

    let mut study = state.db().get(&id)?.ok_or_else(|| Error::not_found("Study"))?;
    if !study.is_owned_by(&user.uid) {
        return Err(Error::forbidden("User not authorized to update this study"));
    }

    let kept_meta: Vec<DocumentMeta> = form.json("kept_documents_metadata")?.unwrap_or_default();
    let deleted: Vec<String> = form.json("deleted_documents_locations")?.unwrap_or_default();
    let new_meta: Vec<DocumentMeta> = form.json("new_documents_metadata")?.unwrap_or_default();
    let patent_status = form.patent_status()?;

    // Only documents already attached to this study can be kept
    let kept: Vec<StudyDocument> = kept_meta
        .iter()
        .filter_map(|meta| {
            let location = meta.file_location.as_deref()?;
            let display_name = meta.display_name.as_deref().filter(|n| !n.trim().is_empty())?;
            let existing = study
                .documents
                .iter()
                .find(|d| d.file_location == location && !deleted.iter().any(|l| l == location))?;
            Some(StudyDocument {
                display_name: display_name.to_string(),
                ..existing.clone()
            })
        })
        .collect();

    if kept.len() + form.files.len() > MAX_DOCUMENTS {
        return Err(Error::bad_request(format!(
            "Cannot exceed {} documents in total.",
            MAX_DOCUMENTS
        )));
    }

    let to_remove: Vec<String> = study
        .documents
        .iter()
        .filter(|d| deleted.iter().any(|l| l == &d.file_location))
        .filter(|d| !kept.iter().any(|k| k.file_location == d.file_location))
        .map(|d| d.file_location.clone())
        .collect();

    let added = place_files(&state, &form.files, &new_meta).await?;

    if let Some(title) = form.text("title") {
        study.title = title.to_string();
    }
    if let Some(abstract_text) = form.text("abstract") {
        study.abstract_text = abstract_text.to_string();
    }
    if let Some(brief) = form.text("brief_description") {
        study.brief_description = brief.to_string();
    }
    if let Some(status) = patent_status {
        study.patent_status = status;
    }
    if let Some(genres) = form.genres() {
        study.genres = genres;
    }
    if let Some(questions) = form.questions() {
        study.questions = questions;
    }
    if let Some(info) = form.additional_info() {
        study.additional_info = info;
    }
    study.documents = kept.into_iter().chain(added.iter().cloned()).collect();

    let updated = match state.db().update(&study) {
        Ok(updated) => updated,
        Err(e) => {
            discard_documents(&state, &added).await;
            return Err(e);
        }
    };

    for location in &to_remove {
        state.files().remove_location(location).await;
    }

    tracing::info!(
        "Study {} updated by {} ({} added, {} removed)",
        id,
        user.uid,
        added.len(),
        to_remove.len()
    );
    Ok(Json(updated))
}

/// DELETE /studies/:id - Delete an owned study and its local documents
pub async fn delete_study(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(raw_id): Path<String>,
) -> Result<Json<MessageResponse>> {
    let id = parse_id(&raw_id, "study")?;
    let study = state.db().get(&id)?.ok_or_else(|| Error::not_found("Study"))?;
    if !study.is_owned_by(&user.uid) {
        return Err(Error::forbidden("User not authorized to delete this study"));
    }

    discard_documents(&state, &study.documents).await;

    if !state.db().delete(&id)? {
        return Err(Error::not_found("Study"));
    }

    tracing::info!("Study {} deleted by {}", id, user.uid);
    Ok(Json(MessageResponse {
        message: "Study deleted successfully".to_string(),
    }))
}
