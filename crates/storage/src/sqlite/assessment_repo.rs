use std::collections::HashMap;

use assess_core::model::{Assessment, AssessmentId, Question, SubjectId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, map_assessment_row, map_question_row, ser, to_json, usize_to_i64};
use crate::repository::{AssessmentRepository, StorageError};

impl SqliteRepository {
    pub(crate) async fn load_questions(
        &self,
        id: &AssessmentId,
    ) -> Result<Vec<Question>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT prompt, options, correct_option
            FROM questions
            WHERE assessment_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_question_row).collect()
    }
}

#[async_trait::async_trait]
impl AssessmentRepository for SqliteRepository {
    async fn list_by_subject(&self, subject: &SubjectId) -> Result<Vec<Assessment>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, kind, subject_id, title, author, duration_minutes, scheduled_start, created_at
            FROM assessments
            WHERE subject_id = ?1
            ORDER BY created_at ASC, id ASC
            ",
        )
        .bind(subject.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let question_rows = sqlx::query(
            r"
            SELECT q.assessment_id, q.prompt, q.options, q.correct_option
            FROM questions q
            JOIN assessments a ON a.id = q.assessment_id
            WHERE a.subject_id = ?1
            ORDER BY q.assessment_id ASC, q.position ASC
            ",
        )
        .bind(subject.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut questions: HashMap<String, Vec<Question>> = HashMap::new();
        for row in &question_rows {
            let owner: String = row.try_get("assessment_id").map_err(ser)?;
            questions
                .entry(owner)
                .or_default()
                .push(map_question_row(row)?);
        }

        let mut assessments = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id").map_err(ser)?;
            let owned = questions.remove(&id).unwrap_or_default();
            assessments.push(map_assessment_row(row, owned)?);
        }
        Ok(assessments)
    }

    async fn get_assessment(&self, id: &AssessmentId) -> Result<Option<Assessment>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, kind, subject_id, title, author, duration_minutes, scheduled_start, created_at
            FROM assessments WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        match row {
            Some(row) => {
                let questions = self.load_questions(id).await?;
                map_assessment_row(&row, questions).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn upsert_assessment(&self, assessment: &Assessment) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO assessments (id, kind, subject_id, title, author, duration_minutes, scheduled_start, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                subject_id = excluded.subject_id,
                title = excluded.title,
                author = excluded.author,
                duration_minutes = excluded.duration_minutes,
                scheduled_start = excluded.scheduled_start
            ",
        )
        .bind(assessment.id().as_str())
        .bind(assessment.kind().as_str())
        .bind(assessment.subject_id().as_str())
        .bind(assessment.title())
        .bind(assessment.author().as_str())
        .bind(i64::from(assessment.duration_minutes()))
        .bind(assessment.scheduled_start())
        .bind(assessment.created_at())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query("DELETE FROM questions WHERE assessment_id = ?1")
            .bind(assessment.id().as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (position, question) in assessment.questions().iter().enumerate() {
            let correct = question
                .correct_option()
                .map(|c| usize_to_i64("correct_option", c))
                .transpose()?;
            sqlx::query(
                r"
                INSERT INTO questions (assessment_id, position, prompt, options, correct_option)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )
            .bind(assessment.id().as_str())
            .bind(usize_to_i64("position", position)?)
            .bind(question.prompt())
            .bind(to_json(question.options())?)
            .bind(correct)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}
