use serde::Serialize;

use assess_core::session::{AssessmentSession, SessionState, SubmitFailure};

/// Render seconds as `MM:SS`; minutes are not capped at 59.
#[must_use]
pub fn format_countdown(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Snapshot of a session for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptView {
    pub title: String,
    pub remaining: String,
    pub remaining_secs: u32,
    pub answered: usize,
    pub total: usize,
    pub pending: bool,
    pub state: String,
    pub notice: Option<String>,
}

impl AttemptView {
    #[must_use]
    pub fn from_session(session: &AssessmentSession) -> Self {
        let state = session.state();
        let total = session.assessment().question_count();
        let answered = session.answers().map_or(0, |a| a.answered_count());

        let notice = match state {
            SessionState::Submitted => Some(match session.submission().and_then(|s| s.score()) {
                Some(score) => format!("Submitted. Score: {score}/{total}"),
                None => "Submitted. Awaiting grading".to_string(),
            }),
            SessionState::AlreadySubmitted => Some("Already completed".to_string()),
            SessionState::Failed { retryable } => {
                let reason = session
                    .last_failure()
                    .map_or_else(String::new, SubmitFailure::to_string);
                Some(if retryable {
                    format!("{reason}. Submit again to retry")
                } else {
                    reason
                })
            }
            SessionState::Aborted => Some("Attempt abandoned".to_string()),
            SessionState::NotStarted | SessionState::Active | SessionState::Submitting => None,
        };

        Self {
            title: session.assessment().title().to_string(),
            remaining: format_countdown(session.remaining_secs()),
            remaining_secs: session.remaining_secs(),
            answered,
            total,
            pending: state == SessionState::Submitting,
            state: state.to_string(),
            notice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assess_core::model::{
        AssessmentDraft, AssessmentId, AssessmentKind, QuestionDraft, SubjectId, UserId,
    };
    use assess_core::time::fixed_now;

    #[test]
    fn countdown_pads_minutes_and_seconds() {
        assert_eq!(format_countdown(0), "00:00");
        assert_eq!(format_countdown(59), "00:59");
        assert_eq!(format_countdown(60), "01:00");
        assert_eq!(format_countdown(1_799), "29:59");
        assert_eq!(format_countdown(7_200), "120:00");
    }

    #[test]
    fn view_tracks_progress_and_pending_state() {
        let mut draft = AssessmentDraft::new(AssessmentKind::Quiz, SubjectId::new("math"));
        draft.title = "Sums".into();
        draft.questions = vec![
            QuestionDraft::new("1+1", ["1", "2", "3", "4"], 1),
            QuestionDraft::new("2+2", ["1", "2", "3", "4"], 3),
        ];
        let assessment = draft
            .validate(AssessmentId::new("quiz-1"), UserId::new("teacher"), fixed_now())
            .unwrap();
        let mut session = AssessmentSession::new(&assessment).unwrap();
        session.start(fixed_now()).unwrap();
        session.set_answer(1, 3).unwrap();

        let view = AttemptView::from_session(&session);
        assert_eq!(view.remaining, "30:00");
        assert_eq!((view.answered, view.total), (1, 2));
        assert!(!view.pending);
        assert_eq!(view.notice, None);

        let pending = session.submit().unwrap();
        assert!(AttemptView::from_session(&session).pending);

        session.complete(
            pending.ticket,
            Err(SubmitFailure::Transport("connection reset".into())),
        );
        let view = AttemptView::from_session(&session);
        assert_eq!(view.state, "failed (retryable)");
        assert_eq!(
            view.notice.as_deref(),
            Some("submission could not be delivered: connection reset. Submit again to retry")
        );
    }
}
