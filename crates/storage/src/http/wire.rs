//! JSON bodies exchanged with the remote assessment backend.

use assess_core::model::{
    Assessment, AssessmentId, AssessmentKind, Question, SubjectId, Submission, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::repository::StorageError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDto {
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentDto {
    pub id: AssessmentId,
    pub kind: AssessmentKind,
    pub subject_id: SubjectId,
    pub title: String,
    pub author: UserId,
    pub questions: Vec<QuestionDto>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionDto {
    pub assessment_id: AssessmentId,
    pub taker: UserId,
    pub answers: Vec<usize>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub score: Option<u32>,
    pub completed: bool,
    pub idempotency_key: Uuid,
}

#[derive(Debug, Serialize)]
pub struct BySubject<'a> {
    pub subject_id: &'a SubjectId,
}

#[derive(Debug, Serialize)]
pub struct ById<'a> {
    pub assessment_id: &'a AssessmentId,
}

#[derive(Debug, Serialize)]
pub struct ByTaker<'a> {
    pub taker: &'a UserId,
}

#[derive(Debug, Serialize)]
pub struct SubmitAnswers<'a> {
    pub taker: &'a UserId,
    pub assessment_id: &'a AssessmentId,
    pub answers: &'a [usize],
    pub idempotency_key: Uuid,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RecordScore<'a> {
    pub assessment_id: &'a AssessmentId,
    pub taker: &'a UserId,
    pub score: u32,
}

impl From<&Assessment> for AssessmentDto {
    fn from(assessment: &Assessment) -> Self {
        Self {
            id: assessment.id().clone(),
            kind: assessment.kind(),
            subject_id: assessment.subject_id().clone(),
            title: assessment.title().to_string(),
            author: assessment.author().clone(),
            questions: assessment
                .questions()
                .iter()
                .map(|q| QuestionDto {
                    prompt: q.prompt().to_string(),
                    options: q.options().to_vec(),
                    correct_option: q.correct_option(),
                })
                .collect(),
            duration_minutes: assessment.duration_minutes(),
            scheduled_start: assessment.scheduled_start(),
            created_at: assessment.created_at(),
        }
    }
}

impl TryFrom<AssessmentDto> for Assessment {
    type Error = StorageError;

    fn try_from(dto: AssessmentDto) -> Result<Self, Self::Error> {
        let questions = dto
            .questions
            .into_iter()
            .map(|q| Question::new(q.prompt, q.options, q.correct_option))
            .collect();
        Assessment::from_persisted(
            dto.id,
            dto.kind,
            dto.subject_id,
            dto.title,
            dto.author,
            questions,
            dto.duration_minutes,
            dto.scheduled_start,
            dto.created_at,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

impl TryFrom<SubmissionDto> for Submission {
    type Error = StorageError;

    fn try_from(dto: SubmissionDto) -> Result<Self, Self::Error> {
        Submission::from_persisted(
            dto.assessment_id,
            dto.taker,
            dto.answers,
            dto.submitted_at,
            dto.score,
            dto.completed,
            dto.idempotency_key,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}
