/// Plan, membership and payment endpoints

use crate::{
    api::{
        extract::{CurrentUser, Operator},
        AppState,
    },
    error::Result,
    membership::{Membership, NewPlan, Payment, PaymentOutcome, Plan, PlanCatalog, UpdatePlan},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/plans", post(create_plan).get(list_plans))
        .route("/api/plans/{id}", get(get_plan).put(update_plan))
        .route("/api/memberships", post(create_membership))
        .route("/api/memberships/{id}", get(get_membership))
        .route("/api/memberships/{id}/payments", post(pay).get(list_payments))
        .route("/api/payments/{id}", get(get_payment))
}

#[derive(Debug, Deserialize)]
pub struct CreateMembershipRequest {
    pub plan_id: String,
}

/// Payment confirmation sent by the client after checkout
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    /// Gateway payment id; amount and status are looked up from the gateway
    pub transaction_id: String,
    pub plan_id: String,
}

async fn owned_membership(state: &AppState, user: &CurrentUser, id: &str) -> Result<Membership> {
    let membership = state.memberships.get_membership(id).await?;
    user.ensure_same_organisation(&membership.organisation_id, "membership")?;
    Ok(membership)
}

/// POST /api/plans (operator only)
/// Body: { "name": "Pro", "description": "...", "monthly_amount": 1000, "yearly_amount": 10000 }
async fn create_plan(
    State(state): State<AppState>,
    _operator: Operator,
    Json(payload): Json<NewPlan>,
) -> Result<(StatusCode, Json<Plan>)> {
    let plan = state.memberships.create_plan(payload).await?;
    state.plans.reload_plan(&plan.id).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

/// GET /api/plans
///
/// Served from the in-memory catalog.
async fn list_plans(State(state): State<AppState>) -> Json<Vec<Plan>> {
    Json(state.plans.all_plans())
}

async fn get_plan(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Plan>> {
    Ok(Json(state.plans.require_plan(&id)?))
}

/// PUT /api/plans/{id} (operator only)
async fn update_plan(
    State(state): State<AppState>,
    _operator: Operator,
    Path(id): Path<String>,
    Json(payload): Json<UpdatePlan>,
) -> Result<Json<Plan>> {
    state.memberships.update_plan(&id, payload).await?;
    Ok(Json(state.plans.reload_plan(&id).await?))
}

/// POST /api/memberships
/// Body: { "plan_id": "..." }
///
/// Starts the caller's organisation on a trial of the plan.
async fn create_membership(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateMembershipRequest>,
) -> Result<(StatusCode, Json<Membership>)> {
    let membership = state
        .memberships
        .create_membership(&user.0.organisation_id, &payload.plan_id)
        .await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

async fn get_membership(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Membership>> {
    Ok(Json(owned_membership(&state, &user, &id).await?))
}

/// POST /api/memberships/{id}/payments
/// Body: { "transaction_id": "pay_...", "plan_id": "..." }
///
/// Fetches the payment from the gateway and applies it to the membership.
async fn pay(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<PaymentRequest>,
) -> Result<Json<PaymentOutcome>> {
    owned_membership(&state, &user, &id).await?;

    let notification = state.gateway.fetch_payment(&payload.transaction_id).await?;
    tracing::info!(
        "💰 Gateway reported payment {} ({}, amount {})",
        notification.transaction_id, notification.status, notification.amount
    );

    let outcome = state
        .memberships
        .update_membership(&*state.plans, &user.0.id, &id, &payload.plan_id, notification)
        .await?;
    Ok(Json(outcome))
}

async fn list_payments(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Payment>>> {
    owned_membership(&state, &user, &id).await?;
    Ok(Json(state.memberships.list_payments(&id).await?))
}

async fn get_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Payment>> {
    let payment = state.memberships.get_payment(&id).await?;
    user.ensure_same_organisation(&payment.organisation_id, "payment")?;
    Ok(Json(payment))
}
