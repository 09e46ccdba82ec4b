//! Error taxonomy shared by the registry, the activity engine, the
//! notification pipeline and the HTTP layer.

use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Referenced record does not exist: {0}")]
    InvalidReference(String),

    #[error("Course offering already exists for this combination")]
    DuplicateOffering,

    #[error("Activity log already exists for week {week}")]
    DuplicateLog { week: i32 },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("You are not assigned to this course offering")]
    OwnershipViolation,

    #[error("Facilitator is not available")]
    FacilitatorUnavailable,

    #[error("Facilitator has reached maximum course load ({max})")]
    CapacityExceeded { max: i32 },

    #[error("Course is full")]
    EnrollmentFull,

    #[error("No students enrolled")]
    NoEnrollment,

    #[error("Email template '{0}' not found")]
    UnknownTemplate(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation(vec![FieldError::new(field, message)])
    }

    /// Stable category identifier carried by every failure response.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_failed",
            Error::InvalidReference(_) => "invalid_reference",
            Error::DuplicateOffering => "duplicate_offering",
            Error::DuplicateLog { .. } => "duplicate_log",
            Error::NotFound(_) => "not_found",
            Error::Unauthenticated => "unauthenticated",
            Error::Forbidden(_) => "forbidden",
            Error::OwnershipViolation => "ownership_violation",
            Error::FacilitatorUnavailable => "facilitator_unavailable",
            Error::CapacityExceeded { .. } => "capacity_exceeded",
            Error::EnrollmentFull => "enrollment_full",
            Error::NoEnrollment => "no_enrollment",
            Error::UnknownTemplate(_) => "unknown_template",
            Error::Delivery(_) => "delivery_failed",
            Error::Timeout(_) => "timeout",
            Error::Queue(_) => "queue_unavailable",
            Error::Config(_) => "configuration",
            Error::Database(_) => "storage_unavailable",
            Error::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_)
            | Error::InvalidReference(_)
            | Error::FacilitatorUnavailable
            | Error::EnrollmentFull
            | Error::NoEnrollment => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) | Error::OwnershipViolation => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::DuplicateOffering | Error::DuplicateLog { .. } | Error::CapacityExceeded { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for storage and broker failures that a caller may resubmit.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Queue(_) | Error::Timeout(_) | Error::Delivery(_)
        )
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "<[FieldError]>::is_empty")]
    errors: &'a [FieldError],
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, kind = self.kind(), "request failed");
            "An unexpected error occurred".to_string()
        } else {
            self.to_string()
        };
        let errors: &[FieldError] = match &self {
            Error::Validation(fields) => fields,
            _ => &[],
        };
        let body = ErrorBody {
            error: self.kind(),
            message,
            errors,
        };
        (status, Json(body)).into_response()
    }
}

/// Maps constraint violations reported by the storage layer onto the
/// conflict and reference variants; anything else stays a database error.
pub(crate) fn classify_db_error(err: sqlx::Error, on_unique: Error) -> Error {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some("23505") => return on_unique,
            Some("23503") => {
                return Error::InvalidReference(db.constraint().unwrap_or("foreign key").to_string())
            }
            _ => {}
        }
    }
    Error::Database(err)
}
