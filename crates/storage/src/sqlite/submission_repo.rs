use assess_core::model::{AssessmentId, Submission, UserId};
use assess_core::session::SubmissionRequest;
use chrono::{DateTime, Utc};

use super::SqliteRepository;
use super::mapping::{conn, map_submission_row, to_json};
use crate::repository::{
    Admission, AssessmentRepository, StorageError, SubmissionRepository, admit_submission,
};

const SUBMISSION_COLUMNS: &str =
    "assessment_id, taker_id, answers, submitted_at, score, completed, idempotency_key";

impl SqliteRepository {
    async fn find_submission(
        &self,
        id: &AssessmentId,
        taker: &UserId,
    ) -> Result<Option<Submission>, StorageError> {
        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE assessment_id = ?1 AND taker_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .bind(taker.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        row.as_ref().map(map_submission_row).transpose()
    }
}

#[async_trait::async_trait]
impl SubmissionRepository for SqliteRepository {
    async fn submit_answers(
        &self,
        taker: &UserId,
        request: &SubmissionRequest,
        submitted_at: DateTime<Utc>,
    ) -> Result<Submission, StorageError> {
        let assessment = self
            .get_assessment(&request.assessment_id)
            .await?
            .ok_or(StorageError::NotFound)?;
        let existing = self.find_submission(&request.assessment_id, taker).await?;

        let submission = match admit_submission(
            &assessment,
            taker,
            request,
            submitted_at,
            existing.as_ref(),
        )? {
            Admission::Replay(existing) => {
                tracing::debug!(
                    assessment_id = %request.assessment_id,
                    taker = %taker,
                    "replayed submission with matching idempotency key"
                );
                return Ok(existing);
            }
            Admission::Insert(submission) => submission,
        };

        let inserted = sqlx::query(
            r"
            INSERT INTO submissions (assessment_id, taker_id, answers, submitted_at, score, completed, idempotency_key)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(submission.assessment_id().as_str())
        .bind(submission.taker().as_str())
        .bind(to_json(submission.answers())?)
        .bind(submission.submitted_at())
        .bind(submission.score().map(i64::from))
        .bind(i64::from(submission.completed()))
        .bind(submission.idempotency_key().to_string())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(submission),
            // Lost a race with a concurrent insert for the same taker.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                match self.find_submission(&request.assessment_id, taker).await? {
                    Some(stored) if stored.idempotency_key() == request.idempotency_key => {
                        Ok(stored)
                    }
                    _ => Err(StorageError::Conflict),
                }
            }
            Err(e) => Err(conn(e)),
        }
    }

    async fn list_for_taker(&self, taker: &UserId) -> Result<Vec<Submission>, StorageError> {
        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE taker_id = ?1 ORDER BY submitted_at ASC, assessment_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(taker.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;
        rows.iter().map(map_submission_row).collect()
    }

    async fn list_for_assessment(
        &self,
        id: &AssessmentId,
    ) -> Result<Vec<Submission>, StorageError> {
        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE assessment_id = ?1 ORDER BY submitted_at ASC, taker_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;
        rows.iter().map(map_submission_row).collect()
    }

    async fn record_score(
        &self,
        id: &AssessmentId,
        taker: &UserId,
        score: u32,
    ) -> Result<Submission, StorageError> {
        let current = self
            .find_submission(id, taker)
            .await?
            .ok_or(StorageError::NotFound)?;
        let graded = current
            .with_score(score)
            .map_err(|e| StorageError::Validation(e.to_string()))?;

        sqlx::query("UPDATE submissions SET score = ?1 WHERE assessment_id = ?2 AND taker_id = ?3")
            .bind(i64::from(score))
            .bind(id.as_str())
            .bind(taker.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;

        Ok(graded)
    }
}
