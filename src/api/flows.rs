/// Flow and state endpoints

use crate::{
    api::{extract::CurrentUser, AppState},
    error::Result,
    flow::{Flow, FlowWithStates, NewFlow, NewState, State as FlowState, UpdateFlow, UpdateState},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows", post(create_flow).get(list_flows))
        .route("/api/flows/{id}", get(get_flow).put(update_flow).delete(delete_flow))
        .route("/api/flows/{id}/states", post(create_state).get(list_states))
        .route("/api/states/{id}", put(update_state).delete(delete_state))
        .route("/api/states/{id}/shuffle", post(shuffle_state))
}

#[derive(Debug, Deserialize)]
pub struct ShuffleRequest {
    /// Positions to move by; negative moves towards the start
    pub additive: i64,
}

/// Load a flow and hide it unless it belongs to the caller's organisation
async fn owned_flow(state: &AppState, user: &CurrentUser, flow_id: &str) -> Result<Flow> {
    let flow = state.flows.get_flow(flow_id).await?;
    user.ensure_same_organisation(&flow.organisation_id, "flow")?;
    Ok(flow)
}

async fn owned_state(state: &AppState, user: &CurrentUser, state_id: &str) -> Result<FlowState> {
    let flow_state = state.flows.get_state(state_id).await?;
    let flow = state.flows.get_flow(&flow_state.flow_id).await?;
    user.ensure_same_organisation(&flow.organisation_id, "state")?;
    Ok(flow_state)
}

/// POST /api/flows
/// Body: { "name": "...", "controlled": true }
///
/// Default states are seeded in the background by the job worker.
async fn create_flow(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<NewFlow>,
) -> Result<(StatusCode, Json<Flow>)> {
    let flow = state.flows.create_flow(&user.0.organisation_id, payload).await?;
    Ok((StatusCode::CREATED, Json(flow)))
}

async fn list_flows(State(state): State<AppState>, user: CurrentUser) -> Result<Json<Vec<Flow>>> {
    Ok(Json(state.flows.list_flows(&user.0.organisation_id).await?))
}

async fn get_flow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<FlowWithStates>> {
    owned_flow(&state, &user, &id).await?;
    Ok(Json(state.flows.get_flow_with_states(&id).await?))
}

async fn update_flow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateFlow>,
) -> Result<Json<Flow>> {
    owned_flow(&state, &user, &id).await?;
    Ok(Json(state.flows.update_flow(&id, payload).await?))
}

async fn delete_flow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    owned_flow(&state, &user, &id).await?;
    state.flows.delete_flow(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/flows/{id}/states
/// Body: { "state": "Legal", "order": 2 }
async fn create_state(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(flow_id): Path<String>,
    Json(payload): Json<NewState>,
) -> Result<(StatusCode, Json<FlowState>)> {
    owned_flow(&state, &user, &flow_id).await?;
    let created = state.flows.create_state(&flow_id, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_states(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(flow_id): Path<String>,
) -> Result<Json<Vec<FlowState>>> {
    owned_flow(&state, &user, &flow_id).await?;
    Ok(Json(state.flows.list_states(&flow_id).await?))
}

async fn update_state(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateState>,
) -> Result<Json<FlowState>> {
    owned_state(&state, &user, &id).await?;
    Ok(Json(state.flows.update_state(&id, payload).await?))
}

async fn delete_state(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    owned_state(&state, &user, &id).await?;
    state.flows.delete_state(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/states/{id}/shuffle
/// Body: { "additive": -1 }
///
/// Returns the flow's states in their new order.
async fn shuffle_state(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<ShuffleRequest>,
) -> Result<Json<Vec<FlowState>>> {
    owned_state(&state, &user, &id).await?;
    Ok(Json(state.flows.shuffle_order(&id, payload.additive).await?))
}
