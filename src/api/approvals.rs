/// Approval system endpoints

use crate::{
    api::{contents::owned_instance, extract::CurrentUser, AppState},
    approval::{Approval, ApprovalStatus, ApprovalSystem, NewApprovalSystem, UpdateApprovalSystem},
    error::{AppError, Result},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/approval-systems", post(create_approval_system).get(list_approval_systems))
        .route(
            "/api/approval-systems/{id}",
            get(get_approval_system).put(update_approval_system).delete(delete_approval_system),
        )
        .route("/api/approval-systems/{id}/approve", post(approve))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Only return systems still waiting for approval
    #[serde(default)]
    pub pending: bool,
}

/// An approval system with its derived status
#[derive(Debug, Serialize)]
pub struct ApprovalSystemView {
    #[serde(flatten)]
    pub system: ApprovalSystem,
    pub status: ApprovalStatus,
}

impl From<ApprovalSystem> for ApprovalSystemView {
    fn from(system: ApprovalSystem) -> Self {
        let status = system.status();
        Self { system, status }
    }
}

async fn owned_system(state: &AppState, user: &CurrentUser, id: &str) -> Result<ApprovalSystem> {
    let system = state.approvals.get(id).await?;
    owned_instance(state, user, &system.instance_id)
        .await
        .map_err(|err| match err {
            AppError::NotFound(_) => AppError::NotFound("approval system"),
            other => other,
        })?;
    Ok(system)
}

/// Approvers must be members of the caller's organisation
async fn check_approver(state: &AppState, user: &CurrentUser, approver_id: &str) -> Result<()> {
    let approver = state.organisations.get_user(approver_id).await?;
    user.ensure_same_organisation(&approver.organisation_id, "user")
}

/// POST /api/approval-systems
/// Body: { "instance_id": "...", "pre_state_id": "...", "post_state_id": "...", "approver_id": "..." }
async fn create_approval_system(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<NewApprovalSystem>,
) -> Result<(StatusCode, Json<ApprovalSystemView>)> {
    owned_instance(&state, &user, &payload.instance_id).await?;
    check_approver(&state, &user, &payload.approver_id).await?;

    let system = state.approvals.create(payload).await?;
    Ok((StatusCode::CREATED, Json(system.into())))
}

/// GET /api/approval-systems?pending=true
///
/// Lists the systems the caller is the approver of.
async fn list_approval_systems(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ApprovalSystemView>>> {
    let systems = state.approvals.list_for_approver(&user.0.id, query.pending).await?;
    Ok(Json(systems.into_iter().map(Into::into).collect()))
}

async fn get_approval_system(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ApprovalSystemView>> {
    Ok(Json(owned_system(&state, &user, &id).await?.into()))
}

async fn update_approval_system(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateApprovalSystem>,
) -> Result<Json<ApprovalSystemView>> {
    owned_system(&state, &user, &id).await?;
    if let Some(approver_id) = &payload.approver_id {
        check_approver(&state, &user, approver_id).await?;
    }
    Ok(Json(state.approvals.update(&id, payload).await?.into()))
}

async fn delete_approval_system(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    owned_system(&state, &user, &id).await?;
    state.approvals.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/approval-systems/{id}/approve
///
/// Moves the instance from the pre-state to the post-state on behalf of the
/// caller, who must be the designated approver.
async fn approve(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Approval>> {
    owned_system(&state, &user, &id).await?;
    Ok(Json(state.approvals.approve(&user.0.id, &id).await?))
}
