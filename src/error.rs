/// Tagged error outcomes shared by storage, services and the HTTP layer
///
/// Every failure a caller can act on has its own variant; the HTTP layer turns
/// them into `{ "error": "<tag>", "message": "..." }` bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// No caller identity on the request
    #[error("missing or unknown user")]
    Unauthenticated,

    /// Caller may not use this route at all
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Current user is not the designated approver
    #[error("user is not the approver of this approval system")]
    InvalidUser,

    /// Instance is not in the approval system's pre-state
    #[error("instance is not in the pre-state of this approval system")]
    UnprocessableState,

    #[error("approval system is already approved")]
    AlreadyApproved,

    /// Paid amount matches neither plan price
    #[error("amount does not match any price of the plan")]
    WrongAmount,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable tag for the error
    pub fn tag(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_failed",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthenticated => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::InvalidUser => "invalid_user",
            AppError::UnprocessableState => "unprocessible_state",
            AppError::AlreadyApproved => "already_approved",
            AppError::WrongAmount => "wrong_amount",
            AppError::Conflict(_) => "conflict",
            AppError::Gateway(_) => "gateway_error",
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::InvalidUser => StatusCode::FORBIDDEN,
            AppError::UnprocessableState | AppError::WrongAmount => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::AlreadyApproved | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                AppError::Validation(db.message().to_string())
            }
            _ => AppError::Database(err),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("❌ {}", self);
        } else {
            tracing::debug!("⚠️ Request rejected ({}): {}", self.tag(), self);
        }

        let body = Json(json!({
            "error": self.tag(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
