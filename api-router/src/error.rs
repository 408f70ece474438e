use std::time::Duration;

use analysis_pipeline::FailureInfo;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::{
    error::{AppError, ErrorKind},
    utils::ingest_limits::IngestValidationError,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// The request was understood but there is nothing to work with.
    #[error("{message}")]
    Unprocessable { kind: ErrorKind, message: String },

    /// A dependency failed in a way the caller may retry.
    #[error("{message}")]
    Unavailable {
        kind: ErrorKind,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("{0}")]
    DeadlineExceeded(String),

    #[error("Upstream error: {0}")]
    Backend(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InternalError(_) => ErrorKind::Internal,
            Self::ValidationError(_) | Self::PayloadTooLarge(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unprocessable { kind, .. } | Self::Unavailable { kind, .. } => *kind,
            Self::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            Self::Backend(_) => ErrorKind::Backend,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Unavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Error for an analysis whose model calls never produced anything usable.
    pub fn from_failure(failure: &FailureInfo) -> Self {
        if failure.kind.is_transient() {
            Self::Unavailable {
                kind: failure.kind,
                message: failure.message.clone(),
                retry_after: failure.retry_after(),
            }
        } else {
            tracing::error!(kind = failure.kind.as_str(), error = %failure.message, "Analysis failed");
            Self::Backend(failure.message.clone())
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let kind = err.kind();
        let retry_after = err.retry_after();
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::NoContext(_) | AppError::PermanentIndexing(_) => Self::Unprocessable {
                kind,
                message: err.to_string(),
            },
            AppError::TransientIndexing { .. }
            | AppError::TransientSearch { .. }
            | AppError::TransientModel { .. }
            | AppError::TransientStorage { .. } => Self::Unavailable {
                kind,
                message: err.to_string(),
                retry_after,
            },
            AppError::DeadlineExceeded(_) => Self::DeadlineExceeded(err.to_string()),
            AppError::Backend(_) | AppError::ObjectStore(_) => {
                tracing::error!("Backend error: {:?}", err);
                Self::Backend("An upstream service rejected the request".to_string())
            }
            AppError::Database(_)
            | AppError::Join(_)
            | AppError::Io(_)
            | AppError::Format(_)
            | AppError::InternalError(_) => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl From<IngestValidationError> for ApiError {
    fn from(err: IngestValidationError) -> Self {
        match err {
            IngestValidationError::PayloadTooLarge(msg) => Self::PayloadTooLarge(msg),
            IngestValidationError::BadRequest(msg) => Self::ValidationError(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after();
        let error_response = ErrorResponse {
            status: "error",
            kind: self.kind().as_str(),
            error: match &self {
                Self::InternalError(message) => message.clone(),
                other => other.to_string(),
            },
            retry_after_secs: retry_after.map(|delay| delay.as_secs()),
        };

        let mut response = (status, Json(error_response)).into_response();
        if let Some(delay) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&delay.as_secs().to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    status: &'static str,
    kind: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}
