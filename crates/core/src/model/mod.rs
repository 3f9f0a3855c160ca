mod assessment;
mod ids;
mod submission;

pub use ids::{AssessmentId, SubjectId, UserId};

pub use assessment::{
    Assessment, AssessmentDraft, AssessmentError, AssessmentKind, OPTIONS_PER_QUESTION, Question,
    QuestionDraft,
};
pub use submission::{Submission, SubmissionError};
