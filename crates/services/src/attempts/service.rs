use std::sync::Arc;

use assess_core::Clock;
use assess_core::model::{AssessmentId, Submission, UserId};
use assess_core::session::{AssessmentSession, PendingSubmission, SubmitFailure, SubmitTrigger};
use storage::repository::{AssessmentRepository, StorageError, SubmissionRepository};

use crate::cache::{Mutation, QueryCache};
use crate::error::AttemptError;

/// Starts sessions and delivers their submissions.
#[derive(Clone)]
pub struct AttemptService {
    clock: Clock,
    assessments: Arc<dyn AssessmentRepository>,
    submissions: Arc<dyn SubmissionRepository>,
    cache: Arc<QueryCache>,
}

impl AttemptService {
    #[must_use]
    pub fn new(
        clock: Clock,
        assessments: Arc<dyn AssessmentRepository>,
        submissions: Arc<dyn SubmissionRepository>,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            clock,
            assessments,
            submissions,
            cache,
        }
    }

    /// Check pre-conditions and start a session for `taker`.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::NotFound`, `AttemptError::AlreadyCompleted` or
    /// `AttemptError::NotYetOpen` before any session exists, and
    /// `AttemptError::Storage` if the repository cannot be read.
    pub async fn begin(
        &self,
        taker: &UserId,
        id: &AssessmentId,
    ) -> Result<AssessmentSession, AttemptError> {
        let assessment = self
            .assessments
            .get_assessment(id)
            .await?
            .ok_or_else(|| AttemptError::NotFound(id.clone()))?;

        let previous = self.submissions.list_for_taker(taker).await?;
        if previous.iter().any(|s| s.assessment_id() == id) {
            return Err(AttemptError::AlreadyCompleted(id.clone()));
        }

        let now = self.clock.now();
        if let Some(opens_at) = assessment
            .scheduled_start()
            .filter(|_| !assessment.is_open_at(now))
        {
            return Err(AttemptError::NotYetOpen { opens_at });
        }

        let mut session = AssessmentSession::new(&assessment)?;
        session.start(now)?;
        tracing::info!(
            assessment_id = %id,
            taker = %taker,
            kind = assessment.kind().as_str(),
            remaining_secs = session.remaining_secs(),
            "session started"
        );
        Ok(session)
    }

    /// Deliver one submission attempt and classify the outcome for the session.
    ///
    /// # Errors
    ///
    /// Returns the `SubmitFailure` the session should apply.
    pub async fn send(
        &self,
        taker: &UserId,
        pending: &PendingSubmission,
    ) -> Result<Submission, SubmitFailure> {
        let request = &pending.request;
        tracing::info!(
            assessment_id = %request.assessment_id,
            taker = %taker,
            ticket = pending.ticket.value(),
            expired = pending.trigger == SubmitTrigger::Expired,
            "submitting answers"
        );

        let outcome = self
            .submissions
            .submit_answers(taker, request, self.clock.now())
            .await;

        let mutation = Mutation::SubmitAnswers {
            assessment_id: request.assessment_id.clone(),
            taker: taker.clone(),
        };
        match outcome {
            Ok(submission) => {
                self.cache.apply(&mutation);
                tracing::info!(
                    assessment_id = %request.assessment_id,
                    score = ?submission.score(),
                    "submission recorded"
                );
                Ok(submission)
            }
            Err(e) => {
                let failure = classify(e);
                if failure == SubmitFailure::AlreadySubmitted {
                    self.cache.apply(&mutation);
                }
                tracing::warn!(
                    assessment_id = %request.assessment_id,
                    retryable = failure.is_retryable(),
                    error = %failure,
                    "submission failed"
                );
                Err(failure)
            }
        }
    }
}

/// Map a repository error onto the session's failure taxonomy.
pub(crate) fn classify(error: StorageError) -> SubmitFailure {
    match error {
        StorageError::Conflict => SubmitFailure::AlreadySubmitted,
        StorageError::Validation(msg) => SubmitFailure::Validation(msg),
        StorageError::NotFound => SubmitFailure::Validation("assessment no longer exists".into()),
        other => SubmitFailure::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_classify_by_retryability() {
        assert_eq!(classify(StorageError::Conflict), SubmitFailure::AlreadySubmitted);
        assert!(classify(StorageError::Connection("reset".into())).is_retryable());
        assert!(classify(StorageError::Serialization("eof".into())).is_retryable());
        assert!(!classify(StorageError::Validation("short".into())).is_retryable());
        assert!(!classify(StorageError::NotFound).is_retryable());
    }
}
