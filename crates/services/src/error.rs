//! Shared error types for the services crate.

use chrono::{DateTime, Utc};
use thiserror::Error;

use assess_core::model::{AssessmentError, AssessmentId};
use assess_core::session::SessionError;
use storage::http::HttpConfigError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `CatalogService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("assessment {0} not found")]
    NotFound(AssessmentId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Pre-condition failures raised before any session exists, plus storage errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("assessment {0} not found")]
    NotFound(AssessmentId),
    #[error("assessment {0} was already completed")]
    AlreadyCompleted(AssessmentId),
    #[error("assessment has not started yet; it opens at {opens_at}")]
    NotYetOpen { opens_at: DateTime<Utc> },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `AuthoringService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthoringError {
    #[error(transparent)]
    Assessment(#[from] AssessmentError),
    #[error("assessment {0} not found")]
    NotFound(AssessmentId),
    #[error("only the author of {0} may grade it")]
    NotAuthor(AssessmentId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Http(#[from] HttpConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
