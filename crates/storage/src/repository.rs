use assess_core::model::{Assessment, AssessmentId, SubjectId, Submission, UserId};
use assess_core::session::SubmissionRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Read and author assessments.
#[async_trait]
pub trait AssessmentRepository: Send + Sync {
    /// All assessments owned by a subject, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the listing cannot be fetched. A partial list is
    /// never returned.
    async fn list_by_subject(&self, subject: &SubjectId) -> Result<Vec<Assessment>, StorageError>;

    /// Fetch one assessment, including its answer key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure; a missing id is `Ok(None)`.
    async fn get_assessment(&self, id: &AssessmentId) -> Result<Option<Assessment>, StorageError>;

    /// Persist or replace an assessment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the assessment cannot be stored.
    async fn upsert_assessment(&self, assessment: &Assessment) -> Result<(), StorageError>;
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Record a taker's answers. At most one submission per (assessment, taker).
    ///
    /// A repeat carrying the stored idempotency key returns the stored submission
    /// instead of failing, so a retry after a lost response is safe.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown assessment,
    /// `StorageError::Validation` for a malformed answer vector, and
    /// `StorageError::Conflict` if a different submission already exists.
    async fn submit_answers(
        &self,
        taker: &UserId,
        request: &SubmissionRequest,
        submitted_at: DateTime<Utc>,
    ) -> Result<Submission, StorageError>;

    /// Every submission by `taker`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the listing cannot be fetched.
    async fn list_for_taker(&self, taker: &UserId) -> Result<Vec<Submission>, StorageError>;

    /// Every submission for one assessment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the listing cannot be fetched.
    async fn list_for_assessment(
        &self,
        id: &AssessmentId,
    ) -> Result<Vec<Submission>, StorageError>;

    /// Apply a manual grade.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no submission exists and
    /// `StorageError::Validation` if the score exceeds the question count.
    async fn record_score(
        &self,
        id: &AssessmentId,
        taker: &UserId,
        score: u32,
    ) -> Result<Submission, StorageError>;
}

/// What a repository should do with an incoming submission.
#[derive(Debug)]
pub(crate) enum Admission {
    /// Same idempotency key as the stored submission; hand that one back.
    Replay(Submission),
    /// New submission to persist.
    Insert(Submission),
}

/// Shared acceptance rules for every adapter that owns its data.
pub(crate) fn admit_submission(
    assessment: &Assessment,
    taker: &UserId,
    request: &SubmissionRequest,
    submitted_at: DateTime<Utc>,
    existing: Option<&Submission>,
) -> Result<Admission, StorageError> {
    if let Some(existing) = existing {
        if existing.idempotency_key() == request.idempotency_key {
            return Ok(Admission::Replay(existing.clone()));
        }
        return Err(StorageError::Conflict);
    }

    assessment
        .check_answers(&request.answers)
        .map_err(|e| StorageError::Validation(e.to_string()))?;

    let score = if assessment.kind().auto_grades() {
        assessment.score(&request.answers)
    } else {
        None
    };

    Submission::from_persisted(
        assessment.id().clone(),
        taker.clone(),
        request.answers.clone(),
        submitted_at,
        score,
        true,
        request.idempotency_key,
    )
    .map(Admission::Insert)
    .map_err(|e| StorageError::Validation(e.to_string()))
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    assessments: Arc<Mutex<HashMap<AssessmentId, Assessment>>>,
    submissions: Arc<Mutex<HashMap<(AssessmentId, UserId), Submission>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl AssessmentRepository for InMemoryRepository {
    async fn list_by_subject(&self, subject: &SubjectId) -> Result<Vec<Assessment>, StorageError> {
        let guard = self.assessments.lock().map_err(poisoned)?;
        let mut found: Vec<Assessment> = guard
            .values()
            .filter(|a| a.subject_id() == subject)
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.created_at(), a.id()).cmp(&(b.created_at(), b.id())));
        Ok(found)
    }

    async fn get_assessment(&self, id: &AssessmentId) -> Result<Option<Assessment>, StorageError> {
        let guard = self.assessments.lock().map_err(poisoned)?;
        Ok(guard.get(id).cloned())
    }

    async fn upsert_assessment(&self, assessment: &Assessment) -> Result<(), StorageError> {
        let mut guard = self.assessments.lock().map_err(poisoned)?;
        guard.insert(assessment.id().clone(), assessment.clone());
        Ok(())
    }
}

#[async_trait]
impl SubmissionRepository for InMemoryRepository {
    async fn submit_answers(
        &self,
        taker: &UserId,
        request: &SubmissionRequest,
        submitted_at: DateTime<Utc>,
    ) -> Result<Submission, StorageError> {
        let assessment = self
            .assessments
            .lock()
            .map_err(poisoned)?
            .get(&request.assessment_id)
            .cloned()
            .ok_or(StorageError::NotFound)?;

        let mut guard = self.submissions.lock().map_err(poisoned)?;
        let key = (request.assessment_id.clone(), taker.clone());
        match admit_submission(&assessment, taker, request, submitted_at, guard.get(&key))? {
            Admission::Replay(existing) => Ok(existing),
            Admission::Insert(submission) => {
                guard.insert(key, submission.clone());
                Ok(submission)
            }
        }
    }

    async fn list_for_taker(&self, taker: &UserId) -> Result<Vec<Submission>, StorageError> {
        let guard = self.submissions.lock().map_err(poisoned)?;
        let mut found: Vec<Submission> = guard
            .values()
            .filter(|s| s.taker() == taker)
            .cloned()
            .collect();
        found.sort_by_key(Submission::submitted_at);
        Ok(found)
    }

    async fn list_for_assessment(
        &self,
        id: &AssessmentId,
    ) -> Result<Vec<Submission>, StorageError> {
        let guard = self.submissions.lock().map_err(poisoned)?;
        let mut found: Vec<Submission> = guard
            .values()
            .filter(|s| s.assessment_id() == id)
            .cloned()
            .collect();
        found.sort_by_key(Submission::submitted_at);
        Ok(found)
    }

    async fn record_score(
        &self,
        id: &AssessmentId,
        taker: &UserId,
        score: u32,
    ) -> Result<Submission, StorageError> {
        let mut guard = self.submissions.lock().map_err(poisoned)?;
        let key = (id.clone(), taker.clone());
        let current = guard.get(&key).cloned().ok_or(StorageError::NotFound)?;
        let graded = current
            .with_score(score)
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        guard.insert(key, graded.clone());
        Ok(graded)
    }
}

/// Aggregate handle the services layer is built on.
#[derive(Clone)]
pub struct Storage {
    pub assessments: Arc<dyn AssessmentRepository>,
    pub submissions: Arc<dyn SubmissionRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let assessments: Arc<dyn AssessmentRepository> = Arc::new(repo.clone());
        let submissions: Arc<dyn SubmissionRepository> = Arc::new(repo);
        Self {
            assessments,
            submissions,
        }
    }
}
