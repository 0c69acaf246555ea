//! Error handling for the carton ledger
//!
//! Floor-level rejections (unknown barcode, wrong status, bad quantity) are
//! ordinary values the scanning UI renders as feedback. Only infrastructure
//! failures are fatal.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{ItemSummary, SessionStatus, TransitionError};
use thiserror::Error;
use uuid::Uuid;

/// Which identity collided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Barcode,
    Threshold,
}

/// Finer reason behind an `InvalidState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateConflict {
    AlreadyScanned,
    WrongStatus,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    InvalidState {
        reason: StateConflict,
        message: String,
        item: Option<ItemSummary>,
    },

    #[error("{0}")]
    InvalidQuantity(String),

    #[error("Duplicate {kind:?}: {key}")]
    DuplicateIdentity { kind: IdentityKind, key: String },

    #[error("Stocktake session {session_id} is {status}")]
    SessionClosed {
        session_id: Uuid,
        status: SessionStatus,
    },

    #[error("Stocktake session {0} is already completed")]
    AlreadyCompleted(Uuid),

    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Infrastructure failures abort the request; everything else is feedback
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::DatabaseError(_)
            | AppError::Configuration(_)
            | AppError::Internal(_)
            | AppError::InternalError(_) => true,
            // Barcodes are pre-printed, so a collision means the allocator is broken
            AppError::DuplicateIdentity { kind, .. } => *kind == IdentityKind::Barcode,
            _ => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidState { .. } => "INVALID_STATE",
            AppError::InvalidQuantity(_) => "INVALID_QUANTITY",
            AppError::DuplicateIdentity { .. } => "DUPLICATE_IDENTITY",
            AppError::SessionClosed { .. } => "SESSION_CLOSED",
            AppError::AlreadyCompleted(_) => "ALREADY_COMPLETED",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState { .. }
            | AppError::SessionClosed { .. }
            | AppError::AlreadyCompleted(_) => StatusCode::CONFLICT,
            AppError::InvalidQuantity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DuplicateIdentity { kind, .. } => match kind {
                IdentityKind::Barcode => StatusCode::INTERNAL_SERVER_ERROR,
                IdentityKind::Threshold => StatusCode::CONFLICT,
            },
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::DatabaseError(_)
            | AppError::Configuration(_)
            | AppError::Internal(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show an operator
    pub fn public_message(&self) -> String {
        match self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalError(_) => "An internal server error occurred".to_string(),
            AppError::Validation { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn item(&self) -> Option<&ItemSummary> {
        match self {
            AppError::InvalidState { item, .. } => item.as_ref(),
            _ => None,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code().to_string(),
            message: self.public_message(),
            field: match self {
                AppError::Validation { field, .. } => Some(field.clone()),
                _ => None,
            },
            reason: match self {
                AppError::InvalidState { reason, .. } => Some(*reason),
                _ => None,
            },
            item: self.item().cloned(),
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        let message = err.to_string();
        match err {
            TransitionError::AlreadyScanned { item } => AppError::InvalidState {
                reason: StateConflict::AlreadyScanned,
                message,
                item: Some(item),
            },
            TransitionError::WrongStatus { item, .. } => AppError::InvalidState {
                reason: StateConflict::WrongStatus,
                message,
                item: Some(item),
            },
            TransitionError::InvalidQuantity(msg) => AppError::InvalidQuantity(msg),
            TransitionError::MissingReason(_) => AppError::validation("reason", message),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let (field, message) = errors
            .field_errors()
            .into_iter()
            .next()
            .map(|(field, errs)| {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for {}", field));
                (field.to_string(), message)
            })
            .unwrap_or_else(|| ("request".to_string(), "Invalid request".to_string()));

        AppError::Validation { field, message }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StateConflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemSummary>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_fatal() {
            tracing::error!(error = ?self, "request failed");
        } else {
            tracing::debug!(code = self.code(), "request rejected: {}", self);
        }

        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.detail(),
            }),
        )
            .into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
