use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::task::JoinError;

/// Failure reported by an outbound client (object store, search backend, model endpoint).
///
/// The classification drives the retry wrappers: only `Transient` failures are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("transient backend failure: {0}")]
    Transient(String),
    #[error("permanent backend failure: {0}")]
    Permanent(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(message) | Self::Permanent(message) | Self::NotFound(message) => {
                message
            }
        }
    }
}

/// Stable, machine-readable failure category surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    TransientIndexing,
    TransientSearch,
    TransientModel,
    TransientStorage,
    PermanentIndexing,
    Format,
    NoContext,
    DeadlineExceeded,
    Backend,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::NotFound => "not_found",
            Self::TransientIndexing => "transient_indexing_error",
            Self::TransientSearch => "transient_search_error",
            Self::TransientModel => "transient_model_error",
            Self::TransientStorage => "transient_storage_error",
            Self::PermanentIndexing => "permanent_indexing_error",
            Self::Format => "format_error",
            Self::NoContext => "no_context",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Backend => "backend_error",
            Self::Internal => "internal_error",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientIndexing
                | Self::TransientSearch
                | Self::TransientModel
                | Self::TransientStorage
                | Self::DeadlineExceeded
        )
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Transient indexing error: {message}")]
    TransientIndexing {
        message: String,
        retry_after: Duration,
    },
    #[error("Permanent indexing error: {0}")]
    PermanentIndexing(String),
    #[error("Transient search error: {message}")]
    TransientSearch {
        message: String,
        retry_after: Duration,
    },
    #[error("Transient model error: {message}")]
    TransientModel {
        message: String,
        retry_after: Duration,
    },
    #[error("Transient storage error: {message}")]
    TransientStorage {
        message: String,
        retry_after: Duration,
    },
    #[error("Model output failed validation: {0}")]
    Format(String),
    #[error("No indexed passages found for {0}")]
    NoContext(String),
    #[error("Request deadline of {}s exceeded", .0.as_secs())]
    DeadlineExceeded(Duration),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::TransientIndexing { .. } => ErrorKind::TransientIndexing,
            Self::PermanentIndexing(_) => ErrorKind::PermanentIndexing,
            Self::TransientSearch { .. } => ErrorKind::TransientSearch,
            Self::TransientModel { .. } => ErrorKind::TransientModel,
            Self::TransientStorage { .. } => ErrorKind::TransientStorage,
            Self::Format(_) => ErrorKind::Format,
            Self::NoContext(_) => ErrorKind::NoContext,
            Self::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            Self::Backend(_) | Self::ObjectStore(_) => ErrorKind::Backend,
            Self::Database(_) | Self::Join(_) | Self::Io(_) | Self::InternalError(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Suggested wait before the caller tries again, present only for transient failures.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TransientIndexing { retry_after, .. }
            | Self::TransientSearch { retry_after, .. }
            | Self::TransientModel { retry_after, .. }
            | Self::TransientStorage { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
