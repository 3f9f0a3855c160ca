mod answers;
mod countdown;
mod machine;

pub use answers::{AnswerBuffer, AnswerError, UNANSWERED_OPTION};
pub use countdown::{Countdown, CountdownTick};
pub use machine::{
    AssessmentSession, Completion, PendingSubmission, SessionError, SessionState,
    SubmissionRequest, SubmissionTicket, SubmitFailure, SubmitTrigger, Tick,
};
