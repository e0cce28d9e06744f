//! HTTP error type.
//!
//! Every failure leaves the server as an RFC 7807 `application/problem+json`
//! body. Internal errors are logged with their cause and reported with a
//! generic detail.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use canteen_core::{ModerationError, ValidationError};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::db::RepositoryError;
use crate::moderation::AdminError;
use crate::submission::SubmissionError;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    InProgress(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Problem details body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl ApiError {
    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InProgress(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation-error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not-found",
            Self::Conflict(_) => "conflict",
            Self::PayloadTooLarge(_) => "payload-too-large",
            Self::InProgress(_) => "request-in-progress",
            Self::Internal(_) => "internal-error",
        }
    }

    pub fn to_problem(&self) -> Problem {
        let status = self.status();
        let detail = match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        Problem {
            kind: format!("/problems/{}", self.slug()),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(cause) = &self {
            error!("Internal error: {}", cause);
        }
        let problem = self.to_problem();
        let body = serde_json::to_vec(&problem).unwrap_or_default();
        (
            self.status(),
            [(header::CONTENT_TYPE, PROBLEM_CONTENT_TYPE)],
            body,
        )
            .into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Conflict(operation) => {
                Self::Conflict(format!("conflicting write during {operation}"))
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ModerationError> for ApiError {
    fn from(e: ModerationError) -> Self {
        match e {
            ModerationError::AlreadyProcessed { .. } => Self::Conflict(e.to_string()),
            ModerationError::MissingReason | ModerationError::InvalidTarget(_) => {
                Self::Validation(e.to_string())
            }
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(e: SubmissionError) -> Self {
        match e {
            SubmissionError::Invalid(e) => e.into(),
            SubmissionError::Rejected(_) => Self::Validation(e.to_string()),
            SubmissionError::StoreNotFound | SubmissionError::ReviewNotFound => {
                Self::NotFound(e.to_string())
            }
            SubmissionError::DuplicateReview | SubmissionError::DuplicateStore => {
                Self::Conflict(e.to_string())
            }
            SubmissionError::NotAuthor => Self::Forbidden(e.to_string()),
            SubmissionError::Storage(_) => Self::Internal(e.to_string()),
            SubmissionError::Repository(e) => e.into(),
        }
    }
}

impl From<AdminError> for ApiError {
    fn from(e: AdminError) -> Self {
        match e {
            AdminError::NotFound(what) => Self::not_found(what),
            AdminError::Moderation(e) => e.into(),
            AdminError::Repository(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(e.body_text())
        } else {
            Self::Validation(e.body_text())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::InProgress("x".into()).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::PayloadTooLarge("x".into()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_internal_detail_is_generic() {
        let problem = ApiError::Internal("disk on fire at /var/db".into()).to_problem();
        assert_eq!(problem.status, 500);
        assert_eq!(problem.detail, "internal server error");
        assert_eq!(problem.title, "Internal Server Error");
    }

    #[test]
    fn test_domain_error_mapping() {
        let e: ApiError = SubmissionError::DuplicateReview.into();
        assert_eq!(e.status(), StatusCode::CONFLICT);

        let e: ApiError = SubmissionError::NotAuthor.into();
        assert_eq!(e.status(), StatusCode::FORBIDDEN);

        let e: ApiError = ValidationError::InvalidRating(5.1).into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);

        let e: ApiError = AdminError::Moderation(ModerationError::MissingReason).into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);

        let e: ApiError = RepositoryError::storage("op", "boom").into();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
