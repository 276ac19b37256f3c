/// HTTP API Layer
///
/// REST endpoints over the storage layer. Every route except health, plan
/// listing and bootstrap (organisation/user creation) acts on behalf of the
/// user named in the `X-User-Id` header and only sees that user's organisation.
/// The plan catalog is shared by all organisations, so writing it takes the
/// operator token instead.

use crate::{
    approval::ApprovalStorage,
    content::ContentStorage,
    flow::FlowStorage,
    membership::{MembershipStorage, PaymentGateway, PlanRegistry},
    organisation::OrganisationStorage,
    runtime::JobQueue,
};
use axum::Router;
use std::sync::Arc;

// Caller identity extraction
pub mod extract;

// Organisation and user bootstrap endpoints
pub mod organisations;

// Flow and state management endpoints
pub mod flows;

// Content type and instance endpoints
pub mod contents;

// Approval system endpoints
pub mod approvals;

// Plan, membership and payment endpoints
pub mod memberships;

// Job queue inspection endpoints
pub mod jobs;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub organisations: OrganisationStorage,
    pub flows: FlowStorage,
    pub content: ContentStorage,
    pub approvals: ApprovalStorage,
    pub memberships: MembershipStorage,
    /// Hot-reload plan catalog used for price lookups
    pub plans: Arc<PlanRegistry>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub jobs: JobQueue,
    /// Secret expected in `X-Operator-Token` for operator-only routes
    pub operator_token: Option<String>,
}

/// All `/api` routes
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(organisations::routes())
        .merge(flows::routes())
        .merge(contents::routes())
        .merge(approvals::routes())
        .merge(memberships::routes())
        .merge(jobs::routes())
}
