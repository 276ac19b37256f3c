/// Organisation and user endpoints

use crate::{
    api::{extract::CurrentUser, AppState},
    error::Result,
    organisation::{NewOrganisation, NewUser, Organisation, User},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/organisations", post(create_organisation).get(list_organisations))
        .route("/api/organisations/{id}", get(get_organisation))
        .route("/api/users", post(create_user))
        .route("/api/users/me", get(current_user))
}

/// POST /api/organisations
/// Body: { "name": "...", "email": "..." }
async fn create_organisation(
    State(state): State<AppState>,
    Json(payload): Json<NewOrganisation>,
) -> Result<(StatusCode, Json<Organisation>)> {
    let organisation = state.organisations.create_organisation(payload).await?;
    Ok((StatusCode::CREATED, Json(organisation)))
}

async fn list_organisations(State(state): State<AppState>) -> Result<Json<Vec<Organisation>>> {
    Ok(Json(state.organisations.list_organisations().await?))
}

async fn get_organisation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Organisation>> {
    Ok(Json(state.organisations.get_organisation(&id).await?))
}

/// POST /api/users
/// Body: { "name": "...", "email": "...", "organisation_id": "..." }
async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<NewUser>,
) -> Result<(StatusCode, Json<User>)> {
    let user = state.organisations.create_user(payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn current_user(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}
