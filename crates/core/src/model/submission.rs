use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::ids::{AssessmentId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmissionError {
    #[error("submission must contain at least one answer")]
    NoAnswers,

    #[error("score {score} exceeds question count {questions}")]
    ScoreOutOfRange { score: u32, questions: usize },
}

/// A taker's recorded answers for one assessment.
///
/// At most one exists per (assessment, taker); the repository enforces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    assessment_id: AssessmentId,
    taker: UserId,
    answers: Vec<usize>,
    submitted_at: DateTime<Utc>,
    score: Option<u32>,
    completed: bool,
    idempotency_key: Uuid,
}

impl Submission {
    /// Rehydrate a submission from storage or the wire.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::NoAnswers` for an empty answer vector, or
    /// `SubmissionError::ScoreOutOfRange` if the score exceeds the answer count.
    pub fn from_persisted(
        assessment_id: AssessmentId,
        taker: UserId,
        answers: Vec<usize>,
        submitted_at: DateTime<Utc>,
        score: Option<u32>,
        completed: bool,
        idempotency_key: Uuid,
    ) -> Result<Self, SubmissionError> {
        if answers.is_empty() {
            return Err(SubmissionError::NoAnswers);
        }
        if let Some(score) = score {
            check_score(score, answers.len())?;
        }
        Ok(Self {
            assessment_id,
            taker,
            answers,
            submitted_at,
            score,
            completed,
            idempotency_key,
        })
    }

    #[must_use]
    pub fn assessment_id(&self) -> &AssessmentId {
        &self.assessment_id
    }

    #[must_use]
    pub fn taker(&self) -> &UserId {
        &self.taker
    }

    #[must_use]
    pub fn answers(&self) -> &[usize] {
        &self.answers
    }

    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    #[must_use]
    pub fn score(&self) -> Option<u32> {
        self.score
    }

    #[must_use]
    pub fn completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn idempotency_key(&self) -> Uuid {
        self.idempotency_key
    }

    #[must_use]
    pub fn is_graded(&self) -> bool {
        self.score.is_some()
    }

    /// Score as a whole percentage of the question count, rounded half up.
    #[must_use]
    pub fn percentage(&self) -> Option<u32> {
        let score = u64::from(self.score?);
        let total = u64::try_from(self.answers.len()).ok()?;
        if total == 0 {
            return None;
        }
        u32::try_from((score * 200 + total) / (total * 2)).ok()
    }

    /// Apply a manual grade.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::ScoreOutOfRange` if `score` exceeds the question count.
    pub fn with_score(mut self, score: u32) -> Result<Self, SubmissionError> {
        check_score(score, self.answers.len())?;
        self.score = Some(score);
        Ok(self)
    }
}

fn check_score(score: u32, questions: usize) -> Result<(), SubmissionError> {
    if usize::try_from(score).map_or(true, |s| s > questions) {
        return Err(SubmissionError::ScoreOutOfRange { score, questions });
    }
    Ok(())
}
