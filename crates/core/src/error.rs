use thiserror::Error;

use crate::model::{AssessmentError, SubmissionError};
use crate::session::{AnswerError, SessionError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Assessment(#[from] AssessmentError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
