//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use tollgate_core::BillingError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Subscription is not active.
    #[error("subscription inactive")]
    SubscriptionInactive,

    /// Subscription period has ended.
    #[error("subscription expired at {period_end}")]
    SubscriptionExpired {
        /// When the period ended (RFC 3339).
        period_end: String,
    },

    /// Insufficient credits.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Upstream relay failure.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::SubscriptionInactive => (
                StatusCode::UNAUTHORIZED,
                "subscription_inactive",
                self.to_string(),
                None,
            ),
            Self::SubscriptionExpired { .. } => (
                StatusCode::PAYMENT_REQUIRED,
                "subscription_expired",
                self.to_string(),
                None,
            ),
            Self::InsufficientCredits { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg.clone(), None),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::SubscriptionInactive { .. } => Self::SubscriptionInactive,
            BillingError::SubscriptionExpired { period_end } => {
                Self::SubscriptionExpired { period_end }
            }
            BillingError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            BillingError::AccountNotFound { user_id } => {
                Self::NotFound(format!("wallet not found: {user_id}"))
            }
            BillingError::InvalidId(e) => Self::BadRequest(e.to_string()),
            BillingError::Upstream(msg) => Self::Upstream(msg),
            BillingError::UnknownModel { .. }
            | BillingError::MalformedPriceEntry { .. }
            | BillingError::PriceFetch(_)
            | BillingError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<tollgate_store::StoreError> for ApiError {
    fn from(err: tollgate_store::StoreError) -> Self {
        match err {
            tollgate_store::StoreError::NotFound => Self::NotFound("wallet not found".into()),
            tollgate_store::StoreError::AlreadyExists { user_id } => {
                Self::Conflict(format!("wallet already exists: {user_id}"))
            }
            tollgate_store::StoreError::Database(msg)
            | tollgate_store::StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}
