use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{AssessmentId, SubjectId, UserId};

/// Number of options every authored question carries.
pub const OPTIONS_PER_QUESTION: usize = 4;

const DEFAULT_QUIZ_MINUTES: u32 = 30;
const DEFAULT_EXAM_MINUTES: u32 = 60;
const DEFAULT_EXAM_TITLE: &str = "Exam";

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AssessmentError {
    #[error("title cannot be empty")]
    EmptyTitle,

    #[error("subject cannot be empty")]
    EmptySubject,

    #[error("duration must be at least one minute")]
    InvalidDuration,

    #[error("assessment must contain at least one question")]
    NoQuestions,

    #[error("question {index} has an empty prompt")]
    EmptyPrompt { index: usize },

    #[error("question {index} must have exactly {expected} options, found {found}")]
    OptionCount {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("question {index} has an empty option at position {option}")]
    EmptyOption { index: usize, option: usize },

    #[error("question {index} has no correct answer")]
    MissingCorrectOption { index: usize },

    #[error("question {index} marks option {option} correct but has {count} options")]
    CorrectOptionOutOfRange {
        index: usize,
        option: usize,
        count: usize,
    },

    #[error("exams require a scheduled start")]
    MissingSchedule,

    #[error("expected {expected} answers, found {found}")]
    AnswerCountMismatch { expected: usize, found: usize },

    #[error("answer {option} for question {index} is out of range ({count} options)")]
    AnswerOutOfRange {
        index: usize,
        option: usize,
        count: usize,
    },
}

//
// ─── KIND ──────────────────────────────────────────────────────────────────────
//

/// Quizzes and exams share session semantics; they differ in grading and scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentKind {
    Quiz,
    Exam,
}

impl AssessmentKind {
    #[must_use]
    pub fn options_per_question(self) -> usize {
        OPTIONS_PER_QUESTION
    }

    /// Quizzes are scored on submission; exam submissions wait for a teacher.
    #[must_use]
    pub fn auto_grades(self) -> bool {
        matches!(self, AssessmentKind::Quiz)
    }

    #[must_use]
    pub fn requires_schedule(self) -> bool {
        matches!(self, AssessmentKind::Exam)
    }

    #[must_use]
    pub fn default_duration_minutes(self) -> u32 {
        match self {
            AssessmentKind::Quiz => DEFAULT_QUIZ_MINUTES,
            AssessmentKind::Exam => DEFAULT_EXAM_MINUTES,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AssessmentKind::Quiz => "quiz",
            AssessmentKind::Exam => "exam",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "quiz" => Some(AssessmentKind::Quiz),
            "exam" => Some(AssessmentKind::Exam),
            _ => None,
        }
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// A multiple-choice question.
///
/// `correct_option` is only populated on the authoring and grading path; the copy
/// handed to a taker never carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    prompt: String,
    options: Vec<String>,
    correct_option: Option<usize>,
}

impl Question {
    #[must_use]
    pub fn new(prompt: impl Into<String>, options: Vec<String>, correct_option: Option<usize>) -> Self {
        Self {
            prompt: prompt.into(),
            options,
            correct_option,
        }
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn option_count(&self) -> usize {
        self.options.len()
    }

    #[must_use]
    pub fn correct_option(&self) -> Option<usize> {
        self.correct_option
    }

    fn redacted(&self) -> Self {
        Self {
            prompt: self.prompt.clone(),
            options: self.options.clone(),
            correct_option: None,
        }
    }
}

//
// ─── ASSESSMENT ────────────────────────────────────────────────────────────────
//

/// A quiz or exam as fetched from the repository. Immutable for the life of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    id: AssessmentId,
    kind: AssessmentKind,
    subject_id: SubjectId,
    title: String,
    author: UserId,
    questions: Vec<Question>,
    duration_minutes: u32,
    scheduled_start: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl Assessment {
    /// Rehydrate an assessment from storage or the wire.
    ///
    /// Correct options may be absent (taker-facing copies), but every question must
    /// still have the fixed option cardinality for its kind.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError` if the structure is invalid.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: AssessmentId,
        kind: AssessmentKind,
        subject_id: SubjectId,
        title: impl Into<String>,
        author: UserId,
        questions: Vec<Question>,
        duration_minutes: u32,
        scheduled_start: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, AssessmentError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(AssessmentError::EmptyTitle);
        }
        if subject_id.as_str().trim().is_empty() {
            return Err(AssessmentError::EmptySubject);
        }
        if duration_minutes == 0 {
            return Err(AssessmentError::InvalidDuration);
        }
        if kind.requires_schedule() && scheduled_start.is_none() {
            return Err(AssessmentError::MissingSchedule);
        }
        validate_questions(kind, &questions, false)?;

        Ok(Self {
            id,
            kind,
            subject_id,
            title,
            author,
            questions,
            duration_minutes,
            scheduled_start,
            created_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> &AssessmentId {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> AssessmentKind {
        self.kind
    }

    #[must_use]
    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn author(&self) -> &UserId {
        &self.author
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    /// Number of options for question `index`, if it exists.
    #[must_use]
    pub fn option_count(&self, index: usize) -> Option<usize> {
        self.questions.get(index).map(Question::option_count)
    }

    #[must_use]
    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    /// Countdown length for a session.
    #[must_use]
    pub fn duration_secs(&self) -> u32 {
        self.duration_minutes.saturating_mul(60)
    }

    #[must_use]
    pub fn scheduled_start(&self) -> Option<DateTime<Utc>> {
        self.scheduled_start
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True when a session may be started at `now`.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_start.is_none_or(|start| now >= start)
    }

    /// True if every question carries a correct option.
    #[must_use]
    pub fn has_answer_key(&self) -> bool {
        self.questions.iter().all(|q| q.correct_option.is_some())
    }

    /// Copy safe to hand to a taker: correct options removed.
    #[must_use]
    pub fn for_taker(&self) -> Self {
        Self {
            questions: self.questions.iter().map(Question::redacted).collect(),
            ..self.clone()
        }
    }

    /// Check a submission vector against this assessment's shape.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError::AnswerCountMismatch` if the length differs from the
    /// question count, or `AssessmentError::AnswerOutOfRange` for an invalid option.
    pub fn check_answers(&self, answers: &[usize]) -> Result<(), AssessmentError> {
        if answers.len() != self.questions.len() {
            return Err(AssessmentError::AnswerCountMismatch {
                expected: self.questions.len(),
                found: answers.len(),
            });
        }
        for (index, (question, &option)) in self.questions.iter().zip(answers).enumerate() {
            if option >= question.option_count() {
                return Err(AssessmentError::AnswerOutOfRange {
                    index,
                    option,
                    count: question.option_count(),
                });
            }
        }
        Ok(())
    }

    /// Number of correct choices, or `None` when the answer key is incomplete.
    #[must_use]
    pub fn score(&self, answers: &[usize]) -> Option<u32> {
        if !self.has_answer_key() {
            return None;
        }
        let correct = self
            .questions
            .iter()
            .zip(answers)
            .filter(|(question, option)| question.correct_option == Some(**option))
            .count();
        Some(u32::try_from(correct).unwrap_or(u32::MAX))
    }
}

//
// ─── DRAFTS ────────────────────────────────────────────────────────────────────
//

/// Unvalidated question as entered by an author.
#[derive(Debug, Clone, Default)]
pub struct QuestionDraft {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_option: Option<usize>,
}

impl QuestionDraft {
    #[must_use]
    pub fn new(
        prompt: impl Into<String>,
        options: impl IntoIterator<Item = impl Into<String>>,
        correct_option: usize,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            options: options.into_iter().map(Into::into).collect(),
            correct_option: Some(correct_option),
        }
    }
}

/// Unvalidated assessment as entered by an author.
#[derive(Debug, Clone)]
pub struct AssessmentDraft {
    pub kind: AssessmentKind,
    pub subject_id: SubjectId,
    pub title: String,
    pub duration_minutes: u32,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub questions: Vec<QuestionDraft>,
}

impl AssessmentDraft {
    #[must_use]
    pub fn new(kind: AssessmentKind, subject_id: SubjectId) -> Self {
        Self {
            kind,
            subject_id,
            title: String::new(),
            duration_minutes: kind.default_duration_minutes(),
            scheduled_start: None,
            questions: Vec::new(),
        }
    }

    /// Validate and normalize the draft into an assessment.
    ///
    /// Every question needs a prompt, exactly the kind's number of non-empty options,
    /// and a correct option.
    ///
    /// # Errors
    ///
    /// Returns the first `AssessmentError` found.
    pub fn validate(
        self,
        id: AssessmentId,
        author: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<Assessment, AssessmentError> {
        let title = match (self.kind, self.title.trim()) {
            (AssessmentKind::Exam, "") => DEFAULT_EXAM_TITLE.to_string(),
            (AssessmentKind::Quiz, "") => return Err(AssessmentError::EmptyTitle),
            (_, title) => title.to_string(),
        };

        let questions: Vec<Question> = self
            .questions
            .into_iter()
            .map(|draft| {
                Question::new(
                    draft.prompt.trim(),
                    draft
                        .options
                        .iter()
                        .map(|option| option.trim().to_string())
                        .collect(),
                    draft.correct_option,
                )
            })
            .collect();
        validate_questions(self.kind, &questions, true)?;

        Assessment::from_persisted(
            id,
            self.kind,
            self.subject_id,
            title,
            author,
            questions,
            self.duration_minutes,
            self.scheduled_start,
            created_at,
        )
    }
}

fn validate_questions(
    kind: AssessmentKind,
    questions: &[Question],
    require_key: bool,
) -> Result<(), AssessmentError> {
    if questions.is_empty() {
        return Err(AssessmentError::NoQuestions);
    }
    let expected = kind.options_per_question();
    for (index, question) in questions.iter().enumerate() {
        if question.prompt.trim().is_empty() {
            return Err(AssessmentError::EmptyPrompt { index });
        }
        if question.options.len() != expected {
            return Err(AssessmentError::OptionCount {
                index,
                expected,
                found: question.options.len(),
            });
        }
        if let Some(option) = question.options.iter().position(|o| o.trim().is_empty()) {
            return Err(AssessmentError::EmptyOption { index, option });
        }
        match question.correct_option {
            Some(option) if option >= question.options.len() => {
                return Err(AssessmentError::CorrectOptionOutOfRange {
                    index,
                    option,
                    count: question.options.len(),
                });
            }
            None if require_key => return Err(AssessmentError::MissingCorrectOption { index }),
            _ => {}
        }
    }
    Ok(())
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
