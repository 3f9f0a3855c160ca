use thiserror::Error;

use crate::model::Assessment;

/// Option index submitted for a question the taker never answered.
///
/// This is a grading policy, not a neutral value: it counts as choosing the first
/// option. Callers that need to tell abstentions apart should inspect
/// [`AnswerBuffer::unanswered`] before materializing the vector.
pub const UNANSWERED_OPTION: usize = 0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerError {
    #[error("question {index} is out of range ({count} questions)")]
    QuestionOutOfRange { index: usize, count: usize },

    #[error("option {option} for question {question} is out of range ({count} options)")]
    OptionOutOfRange {
        question: usize,
        option: usize,
        count: usize,
    },
}

/// The taker's current choice per question, local until submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerBuffer {
    option_counts: Vec<usize>,
    choices: Vec<Option<usize>>,
}

impl AnswerBuffer {
    /// Empty buffer shaped like `assessment`.
    #[must_use]
    pub fn for_assessment(assessment: &Assessment) -> Self {
        Self::with_option_counts(
            assessment
                .questions()
                .iter()
                .map(|q| q.option_count())
                .collect(),
        )
    }

    #[must_use]
    pub fn with_option_counts(option_counts: Vec<usize>) -> Self {
        let choices = vec![None; option_counts.len()];
        Self {
            option_counts,
            choices,
        }
    }

    /// Check that `option` is a valid choice for `question` without recording it.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError` for an out-of-range question or option.
    pub fn check(&self, question: usize, option: usize) -> Result<(), AnswerError> {
        let count = *self
            .option_counts
            .get(question)
            .ok_or(AnswerError::QuestionOutOfRange {
                index: question,
                count: self.option_counts.len(),
            })?;
        if option >= count {
            return Err(AnswerError::OptionOutOfRange {
                question,
                option,
                count,
            });
        }
        Ok(())
    }

    /// Record `option` for `question`, overwriting any previous choice.
    ///
    /// Callers are expected to pass indices that [`AnswerBuffer::check`] accepts.
    /// An out-of-range pair is a contract violation: debug builds panic, release
    /// builds return the error.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError` for an out-of-range question or option; the buffer is
    /// left unchanged.
    pub fn set(&mut self, question: usize, option: usize) -> Result<(), AnswerError> {
        let checked = self.check(question, option);
        debug_assert!(
            checked.is_ok(),
            "answer contract violation: {:?}",
            checked.as_ref().err()
        );
        checked?;
        self.choices[question] = Some(option);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, question: usize) -> Option<usize> {
        self.choices.get(question).copied().flatten()
    }

    /// Number of questions in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.choices.iter().filter(|c| c.is_some()).count()
    }

    /// Indices of questions without a choice, in order.
    #[must_use]
    pub fn unanswered(&self) -> Vec<usize> {
        self.choices
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.is_none().then_some(i))
            .collect()
    }

    /// One option index per question, with [`UNANSWERED_OPTION`] filling the gaps.
    #[must_use]
    pub fn to_submission_vector(&self) -> Vec<usize> {
        self.choices
            .iter()
            .map(|c| c.unwrap_or(UNANSWERED_OPTION))
            .collect()
    }
}
