use std::sync::Arc;

use assess_core::Clock;
use assess_core::model::{Assessment, AssessmentDraft, AssessmentId, Submission, UserId};
use storage::repository::{AssessmentRepository, SubmissionRepository};

use crate::cache::{Cached, Mutation, QueryCache, QueryKey};
use crate::error::AuthoringError;

/// Author-side operations: creating assessments and grading submissions.
#[derive(Clone)]
pub struct AuthoringService {
    clock: Clock,
    assessments: Arc<dyn AssessmentRepository>,
    submissions: Arc<dyn SubmissionRepository>,
    cache: Arc<QueryCache>,
}

impl AuthoringService {
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

    /// Validate and store a new assessment under a fresh id.
    ///
    /// # Errors
    ///
    /// Returns `AuthoringError::Assessment` for an invalid draft, or
    /// `AuthoringError::Storage` if it cannot be stored.
    pub async fn create(
        &self,
        author: &UserId,
        draft: AssessmentDraft,
    ) -> Result<Assessment, AuthoringError> {
        let assessment =
            draft.validate(AssessmentId::generate(), author.clone(), self.clock.now())?;
        self.assessments.upsert_assessment(&assessment).await?;
        self.cache.apply(&Mutation::CreateAssessment {
            assessment_id: assessment.id().clone(),
            subject_id: assessment.subject_id().clone(),
        });
        tracing::info!(
            assessment_id = %assessment.id(),
            subject = %assessment.subject_id(),
            kind = assessment.kind().as_str(),
            questions = assessment.question_count(),
            "assessment created"
        );
        Ok(assessment)
    }

    /// Every submission for one assessment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AuthoringError::Storage` if the listing cannot be fetched.
    pub async fn submissions_for(
        &self,
        id: &AssessmentId,
    ) -> Result<Arc<Vec<Submission>>, AuthoringError> {
        let key = QueryKey::SubmissionsFor(id.clone());
        if let Some(hit) = self.cache.submissions(&key) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let fetched = Arc::new(self.submissions.list_for_assessment(id).await?);
        self.cache.insert(key, Cached::Submissions(Arc::clone(&fetched)), generation);
        Ok(fetched)
    }

    /// Grade a submission by hand. Only the assessment's author may grade.
    ///
    /// # Errors
    ///
    /// Returns `AuthoringError::NotFound` for an unknown assessment,
    /// `AuthoringError::NotAuthor` for anyone but the author, and
    /// `AuthoringError::Storage` if the submission is missing or the score
    /// exceeds the question count.
    pub async fn record_score(
        &self,
        grader: &UserId,
        id: &AssessmentId,
        taker: &UserId,
        score: u32,
    ) -> Result<Submission, AuthoringError> {
        let assessment = self
            .assessments
            .get_assessment(id)
            .await?
            .ok_or_else(|| AuthoringError::NotFound(id.clone()))?;
        if assessment.author() != grader {
            return Err(AuthoringError::NotAuthor(id.clone()));
        }

        let graded = self.submissions.record_score(id, taker, score).await?;
        self.cache.apply(&Mutation::RecordScore {
            assessment_id: id.clone(),
            taker: taker.clone(),
        });
        tracing::info!(assessment_id = %id, taker = %taker, score, "submission graded");
        Ok(graded)
    }
}
