use assess_core::model::{
    Assessment, AssessmentId, AssessmentKind, Question, SubjectId, Submission, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn usize_to_i64(field: &'static str, v: usize) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn parse_kind(s: &str) -> Result<AssessmentKind, StorageError> {
    AssessmentKind::parse(s)
        .ok_or_else(|| StorageError::Serialization(format!("invalid kind: {s}")))
}

/// Option lists and answer vectors are stored as JSON arrays.
pub(crate) fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(
    field: &'static str,
    raw: &str,
) -> Result<T, StorageError> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::Serialization(format!("invalid {field}: {e}")))
}

pub(crate) fn map_question_row(row: &SqliteRow) -> Result<Question, StorageError> {
    let options: Vec<String> =
        from_json("options", &row.try_get::<String, _>("options").map_err(ser)?)?;
    let correct_option = row
        .try_get::<Option<i64>, _>("correct_option")
        .map_err(ser)?
        .map(|v| {
            usize::try_from(v)
                .map_err(|_| StorageError::Serialization(format!("invalid correct_option: {v}")))
        })
        .transpose()?;

    Ok(Question::new(
        row.try_get::<String, _>("prompt").map_err(ser)?,
        options,
        correct_option,
    ))
}

pub(crate) fn map_assessment_row(
    row: &SqliteRow,
    questions: Vec<Question>,
) -> Result<Assessment, StorageError> {
    let kind = parse_kind(row.try_get::<String, _>("kind").map_err(ser)?.as_str())?;
    let duration_minutes = u32_from_i64(
        "duration_minutes",
        row.try_get::<i64, _>("duration_minutes").map_err(ser)?,
    )?;

    Assessment::from_persisted(
        AssessmentId::new(row.try_get::<String, _>("id").map_err(ser)?),
        kind,
        SubjectId::new(row.try_get::<String, _>("subject_id").map_err(ser)?),
        row.try_get::<String, _>("title").map_err(ser)?,
        UserId::new(row.try_get::<String, _>("author").map_err(ser)?),
        questions,
        duration_minutes,
        row.try_get("scheduled_start").map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_submission_row(row: &SqliteRow) -> Result<Submission, StorageError> {
    let answers: Vec<usize> =
        from_json("answers", &row.try_get::<String, _>("answers").map_err(ser)?)?;
    let score = row
        .try_get::<Option<i64>, _>("score")
        .map_err(ser)?
        .map(|v| u32_from_i64("score", v))
        .transpose()?;
    let completed = row.try_get::<i64, _>("completed").map_err(ser)? != 0;
    let key = row.try_get::<String, _>("idempotency_key").map_err(ser)?;
    let idempotency_key = Uuid::parse_str(&key).map_err(ser)?;

    Submission::from_persisted(
        AssessmentId::new(row.try_get::<String, _>("assessment_id").map_err(ser)?),
        UserId::new(row.try_get::<String, _>("taker_id").map_err(ser)?),
        answers,
        row.try_get("submitted_at").map_err(ser)?,
        score,
        completed,
        idempotency_key,
    )
    .map_err(ser)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_text() {
        assert_eq!(parse_kind("quiz").unwrap(), AssessmentKind::Quiz);
        assert_eq!(parse_kind("exam").unwrap(), AssessmentKind::Exam);
        assert!(matches!(
            parse_kind("survey"),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn json_columns_reject_garbage() {
        assert_eq!(from_json::<Vec<usize>>("answers", "[2,0,0]").unwrap(), vec![2, 0, 0]);
        assert!(from_json::<Vec<usize>>("answers", "[-1]").is_err());
        assert_eq!(to_json(&[1usize, 3, 0][..]).unwrap(), "[1,3,0]");
    }
}
