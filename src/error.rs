use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type Result<T> = std::result::Result<T, ApiError>;

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ErrorCode {
    // Authentication errors (1xxx)
    #[serde(rename = "AUTH_1001")]
    Unauthorized,
    #[serde(rename = "AUTH_1002")]
    Forbidden,

    // Validation errors (3xxx)
    #[serde(rename = "VAL_3001")]
    InvalidInput,
    #[serde(rename = "VAL_3002")]
    MissingRequiredField,
    #[serde(rename = "VAL_3003")]
    WindowTooShort,

    // Resource errors (4xxx)
    #[serde(rename = "RES_4001")]
    NotFound,

    // Business logic errors (5xxx)
    #[serde(rename = "BIZ_5001")]
    InsufficientBalance,
    #[serde(rename = "BIZ_5002")]
    InvalidState,

    // Database / internal errors (7xxx / 9xxx)
    #[serde(rename = "DB_7001")]
    DatabaseError,
    #[serde(rename = "INT_9999")]
    InternalServerError,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        code: ErrorCode,
    },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation_error(message: impl Into<String>, field: Option<&str>) -> Self {
        ApiError::Validation {
            message: message.into(),
            field: field.map(String::from),
            code: ErrorCode::InvalidInput,
        }
    }

    pub fn window_too_short(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            field: Some("end_time".to_string()),
            code: ErrorCode::WindowTooShort,
        }
    }

    fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            ApiError::Validation { code, .. } => (StatusCode::BAD_REQUEST, *code),
            ApiError::InsufficientBalance { .. } => {
                (StatusCode::CONFLICT, ErrorCode::InsufficientBalance)
            }
            ApiError::InvalidState(_) => (StatusCode::CONFLICT, ErrorCode::InvalidState),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, ErrorCode::Forbidden),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized),
            ApiError::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DatabaseError)
            }
            ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalServerError)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internal details stay in the logs, not in the response body.
        let message = match &self {
            ApiError::Database(e) => {
                error!("Database error: {}", e);
                "Internal server error".to_string()
            }
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                "Internal server error".to_string()
            }
            other => {
                warn!("Request failed: {}", other);
                other.to_string()
            }
        };

        let field = match &self {
            ApiError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        (status, Json(ErrorBody { code, message, field })).into_response()
    }
}
