/// Content type and instance endpoints

use crate::{
    api::{extract::CurrentUser, AppState},
    content::{ContentType, Instance, NewContentType, NewInstance, UpdateInstance},
    error::Result,
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
        .route("/api/content-types", post(create_content_type).get(list_content_types))
        .route("/api/content-types/{id}", get(get_content_type))
        .route("/api/content-types/{id}/contents", post(create_instance).get(list_instances))
        .route("/api/contents/{id}", get(get_instance).put(update_instance).delete(delete_instance))
}

pub(crate) async fn owned_content_type(state: &AppState, user: &CurrentUser, id: &str) -> Result<ContentType> {
    let content_type = state.content.get_content_type(id).await?;
    user.ensure_same_organisation(&content_type.organisation_id, "content type")?;
    Ok(content_type)
}

/// Load an instance and hide it unless its content type belongs to the caller's organisation
pub(crate) async fn owned_instance(state: &AppState, user: &CurrentUser, id: &str) -> Result<Instance> {
    let instance = state.content.get_instance(id).await?;
    let content_type = state.content.get_content_type(&instance.content_type_id).await?;
    user.ensure_same_organisation(&content_type.organisation_id, "instance")?;
    Ok(instance)
}

/// POST /api/content-types
/// Body: { "name": "Invoice", "prefix": "INV", "flow_id": "..." }
async fn create_content_type(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<NewContentType>,
) -> Result<(StatusCode, Json<ContentType>)> {
    let content_type = state.content.create_content_type(&user.0.organisation_id, payload).await?;
    Ok((StatusCode::CREATED, Json(content_type)))
}

async fn list_content_types(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Vec<ContentType>>> {
    Ok(Json(state.content.list_content_types(&user.0.organisation_id).await?))
}

async fn get_content_type(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ContentType>> {
    Ok(Json(owned_content_type(&state, &user, &id).await?))
}

/// POST /api/content-types/{id}/contents
/// Body: { "serialized": { ... } }
///
/// The new instance starts in the first state of the content type's flow.
async fn create_instance(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(content_type_id): Path<String>,
    Json(payload): Json<NewInstance>,
) -> Result<(StatusCode, Json<Instance>)> {
    owned_content_type(&state, &user, &content_type_id).await?;
    let instance = state.content.create_instance(&content_type_id, &user.0.id, payload).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

async fn list_instances(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(content_type_id): Path<String>,
) -> Result<Json<Vec<Instance>>> {
    owned_content_type(&state, &user, &content_type_id).await?;
    Ok(Json(state.content.list_instances(&content_type_id).await?))
}

async fn get_instance(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Instance>> {
    Ok(Json(owned_instance(&state, &user, &id).await?))
}

async fn update_instance(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateInstance>,
) -> Result<Json<Instance>> {
    owned_instance(&state, &user, &id).await?;
    Ok(Json(state.content.update_instance(&id, payload).await?))
}

async fn delete_instance(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    owned_instance(&state, &user, &id).await?;
    state.content.delete_instance(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
