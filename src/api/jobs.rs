/// Job queue inspection endpoints
///
/// Background failures surface here: jobs that exhausted their attempts stay
/// in the `failed` status with the last error attached. Callers only see the
/// jobs of their own organisation.

use crate::{
    api::{extract::CurrentUser, AppState},
    error::Result,
    runtime::{JobRecord, JobStatus},
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/{id}", get(get_job))
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub status: Option<String>,
}

/// GET /api/jobs?status=failed
async fn list_jobs(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<JobQuery>,
) -> Result<Json<Vec<JobRecord>>> {
    let status = query.status.as_deref().map(str::parse::<JobStatus>).transpose()?;
    Ok(Json(state.jobs.list_for_organisation(&user.0.organisation_id, status).await?))
}

async fn get_job(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>> {
    Ok(Json(state.jobs.get_for_organisation(&user.0.organisation_id, &id).await?))
}
