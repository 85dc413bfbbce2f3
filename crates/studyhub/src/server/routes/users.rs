//! Caller-scoped study endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::parse_id;
use crate::auth::AuthUser;
use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{StudyFilter, StudyPage, StudyRecord};

const DEFAULT_PAGE_SIZE: u32 = 6;

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

impl PageParams {
    fn page(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|p| p.parse().ok())
            .filter(|p| *p > 0)
            .unwrap_or(1)
    }

    fn limit(&self) -> u32 {
        self.limit
            .as_deref()
            .and_then(|l| l.parse().ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(100)
    }
}

/// GET /api/my-studies - The caller's studies, most recently updated first
pub async fn my_studies(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(params): Query<PageParams>,
) -> Result<Json<StudyPage>> {
    let (page, limit) = (params.page(), params.limit());
    let (studies, total) = state.db().list_by_researcher(&user.uid, page, limit)?;

    let filter = StudyFilter {
        page,
        limit,
        ..Default::default()
    };
    Ok(Json(StudyPage::new(studies, total, &filter)))
}

/// GET /api/my-studies/:id - One of the caller's studies
pub async fn my_study(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(raw_id): Path<String>,
) -> Result<Json<StudyRecord>> {
    let id = parse_id(&raw_id, "study")?;
    let study = state.db().get(&id)?.ok_or_else(|| Error::not_found("Study"))?;
    if !study.is_owned_by(&user.uid) {
        return Err(Error::forbidden("You do not own this study."));
    }
    Ok(Json(study))
}
