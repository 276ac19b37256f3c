/// Caller identity extraction
///
/// Authentication itself lives in front of this service; requests arrive with
/// the authenticated user's id in the `X-User-Id` header.

use crate::{api::AppState, error::AppError, organisation::User};
use axum::{extract::FromRequestParts, http::request::Parts};

pub const USER_HEADER: &str = "x-user-id";
pub const OPERATOR_HEADER: &str = "x-operator-token";

/// The user a request acts on behalf of
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AppError::Unauthenticated)?;

        match state.organisations.get_user(user_id).await {
            Ok(user) => Ok(CurrentUser(user)),
            Err(AppError::NotFound(_)) => Err(AppError::Unauthenticated),
            Err(e) => Err(e),
        }
    }
}

impl CurrentUser {
    /// Hide resources of other organisations behind a 404
    pub fn ensure_same_organisation(&self, organisation_id: &str, resource: &'static str) -> Result<(), AppError> {
        if self.0.organisation_id == organisation_id {
            Ok(())
        } else {
            Err(AppError::NotFound(resource))
        }
    }
}

/// Proof that the request carries the configured operator token
#[derive(Debug, Clone, Copy)]
pub struct Operator;

impl FromRequestParts<AppState> for Operator {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.operator_token.as_deref() else {
            return Err(AppError::Forbidden("operator routes are disabled"));
        };

        let presented = parts.headers.get(OPERATOR_HEADER).and_then(|value| value.to_str().ok());
        if presented == Some(expected) {
            Ok(Operator)
        } else {
            tracing::warn!("🚫 Rejected operator request to {}", parts.uri.path());
            Err(AppError::Forbidden("operator token required"))
        }
    }
}
