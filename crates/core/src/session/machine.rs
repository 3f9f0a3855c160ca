use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Assessment, AssessmentId, Submission};

use super::answers::{AnswerBuffer, AnswerError};
use super::countdown::{Countdown, CountdownTick};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Rejected taker actions. None of these change session state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("assessment has no questions")]
    Empty,

    #[error("assessment opens at {opens_at}")]
    NotYetOpen { opens_at: DateTime<Utc> },

    #[error("cannot {action} while the session is {state}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },

    #[error("answers are frozen while the session is {state}")]
    AnswersFrozen { state: SessionState },

    #[error("time is up; only resubmitting is possible")]
    TimeUp,

    #[error(transparent)]
    Answer(#[from] AnswerError),
}

/// Why the repository refused or failed a submission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmitFailure {
    #[error("submission could not be delivered: {0}")]
    Transport(String),

    #[error("assessment was already submitted")]
    AlreadySubmitted,

    #[error("submission was rejected: {0}")]
    Validation(String),
}

impl SubmitFailure {
    /// Only transport failures may be retried with the same payload.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitFailure::Transport(_))
    }
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Active,
    Submitting,
    Submitted,
    /// The repository already held a submission; shown read-only like `Submitted`.
    AlreadySubmitted,
    Failed { retryable: bool },
    Aborted,
}

impl SessionState {
    /// No further transition (other than a no-op abort) is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Submitted
                | SessionState::AlreadySubmitted
                | SessionState::Aborted
                | SessionState::Failed { retryable: false }
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::NotStarted => "not started",
            SessionState::Active => "active",
            SessionState::Submitting => "submitting",
            SessionState::Submitted => "submitted",
            SessionState::AlreadySubmitted => "already submitted",
            SessionState::Failed { retryable: true } => "failed (retryable)",
            SessionState::Failed { retryable: false } => "failed",
            SessionState::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

//
// ─── SUBMISSION EFFECTS ────────────────────────────────────────────────────────
//

/// Exactly what is sent to the repository. Identical for manual and timed-out submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub assessment_id: AssessmentId,
    pub answers: Vec<usize>,
    /// Constant for the whole session so retries can be deduplicated server-side.
    pub idempotency_key: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTrigger {
    Manual,
    Expired,
}

/// Identifies one submission attempt; results carrying an older ticket are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionTicket(u32);

impl SubmissionTicket {
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

/// A submission the caller must now deliver to the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmission {
    pub ticket: SubmissionTicket,
    pub trigger: SubmitTrigger,
    pub request: SubmissionRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    Inert,
    Counting { remaining_secs: u32 },
    Expired(PendingSubmission),
}

/// How a repository result was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Submitted,
    AlreadySubmitted,
    Failed { retryable: bool },
    /// The session moved on (aborted or a newer attempt); nothing was applied.
    Stale,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One taking-attempt: a countdown plus an answer buffer over a taker copy of an
/// assessment.
///
/// The session performs no I/O. `submit` and an expiring `tick` hand back a
/// [`PendingSubmission`]; the caller delivers it and reports the outcome through
/// [`AssessmentSession::complete`].
pub struct AssessmentSession {
    assessment: Assessment,
    state: SessionState,
    countdown: Countdown,
    answers: Option<AnswerBuffer>,
    idempotency_key: Uuid,
    next_ticket: u32,
    in_flight: Option<SubmissionTicket>,
    submission: Option<Submission>,
    last_failure: Option<SubmitFailure>,
}

impl AssessmentSession {
    /// Prepare a session. Correct options are stripped from the stored copy.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Empty` if the assessment has no questions.
    pub fn new(assessment: &Assessment) -> Result<Self, SessionError> {
        if assessment.question_count() == 0 {
            return Err(SessionError::Empty);
        }
        Ok(Self {
            assessment: assessment.for_taker(),
            state: SessionState::NotStarted,
            countdown: Countdown::new(),
            answers: None,
            idempotency_key: Uuid::new_v4(),
            next_ticket: 0,
            in_flight: None,
            submission: None,
            last_failure: None,
        })
    }

    /// Use a caller-chosen idempotency key instead of a random one.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: Uuid) -> Self {
        self.idempotency_key = key;
        self
    }

    #[must_use]
    pub fn assessment(&self) -> &Assessment {
        &self.assessment
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn remaining_secs(&self) -> u32 {
        self.countdown.remaining_secs()
    }

    #[must_use]
    pub fn is_clock_running(&self) -> bool {
        self.countdown.is_running()
    }

    /// The live buffer; `None` before start and after it was discarded.
    #[must_use]
    pub fn answers(&self) -> Option<&AnswerBuffer> {
        self.answers.as_ref()
    }

    #[must_use]
    pub fn idempotency_key(&self) -> Uuid {
        self.idempotency_key
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<SubmissionTicket> {
        self.in_flight
    }

    #[must_use]
    pub fn submission(&self) -> Option<&Submission> {
        self.submission.as_ref()
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<&SubmitFailure> {
        self.last_failure.as_ref()
    }

    /// Begin taking the assessment at `now`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotYetOpen` before the scheduled start (no clock is
    /// armed), or `SessionError::InvalidTransition` if already started.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.state != SessionState::NotStarted {
            return Err(self.invalid("start"));
        }
        if let Some(opens_at) = self.assessment.scheduled_start().filter(|at| now < *at) {
            return Err(SessionError::NotYetOpen { opens_at });
        }

        self.answers = Some(AnswerBuffer::for_assessment(&self.assessment));
        self.countdown.start(self.assessment.duration_secs());
        self.state = SessionState::Active;
        Ok(())
    }

    /// Validate a choice without recording it. Boundaries that take indices from
    /// outside (a terminal, a socket) call this before [`Self::set_answer`].
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AnswersFrozen` outside `Active`, or
    /// `SessionError::Answer` for out-of-range indices.
    pub fn check_answer(&self, question: usize, option: usize) -> Result<(), SessionError> {
        match (&self.state, &self.answers) {
            (SessionState::Active, Some(answers)) => Ok(answers.check(question, option)?),
            _ => Err(SessionError::AnswersFrozen { state: self.state }),
        }
    }

    /// Record a choice. Only allowed while `Active`.
    ///
    /// Out-of-range indices are a contract violation and panic in debug builds;
    /// see [`AnswerBuffer::set`].
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AnswersFrozen` outside `Active`, or
    /// `SessionError::Answer` for out-of-range indices.
    pub fn set_answer(&mut self, question: usize, option: usize) -> Result<(), SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::AnswersFrozen { state: self.state });
        }
        let answers = self
            .answers
            .as_mut()
            .ok_or(SessionError::AnswersFrozen { state: self.state })?;
        answers.set(question, option)?;
        Ok(())
    }

    /// Advance the countdown by one second. Expiry auto-submits.
    pub fn tick(&mut self) -> Tick {
        if self.state != SessionState::Active {
            return Tick::Inert;
        }
        match self.countdown.tick() {
            CountdownTick::Inert => Tick::Inert,
            CountdownTick::Remaining(remaining_secs) => Tick::Counting { remaining_secs },
            CountdownTick::Expired => self
                .begin_submission(SubmitTrigger::Expired)
                .map_or(Tick::Inert, Tick::Expired),
        }
    }

    /// Explicit submit, or a manual retry after a retryable failure.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` from any other state.
    pub fn submit(&mut self) -> Result<PendingSubmission, SessionError> {
        match self.state {
            SessionState::Active | SessionState::Failed { retryable: true } => {
                self.begin_submission(SubmitTrigger::Manual)
            }
            _ => Err(self.invalid("submit")),
        }
    }

    fn begin_submission(&mut self, trigger: SubmitTrigger) -> Result<PendingSubmission, SessionError> {
        let answers = self
            .answers
            .as_ref()
            .ok_or_else(|| self.invalid("submit"))?
            .to_submission_vector();

        self.countdown.stop();
        self.next_ticket += 1;
        let ticket = SubmissionTicket(self.next_ticket);
        self.in_flight = Some(ticket);
        self.last_failure = None;
        self.state = SessionState::Submitting;

        Ok(PendingSubmission {
            ticket,
            trigger,
            request: SubmissionRequest {
                assessment_id: self.assessment.id().clone(),
                answers,
                idempotency_key: self.idempotency_key,
            },
        })
    }

    /// Apply the repository's answer for the attempt identified by `ticket`.
    pub fn complete(
        &mut self,
        ticket: SubmissionTicket,
        result: Result<Submission, SubmitFailure>,
    ) -> Completion {
        if self.state != SessionState::Submitting || self.in_flight != Some(ticket) {
            return Completion::Stale;
        }
        self.in_flight = None;
        self.countdown.stop();

        match result {
            Ok(submission) => {
                self.answers = None;
                self.submission = Some(submission);
                self.state = SessionState::Submitted;
                Completion::Submitted
            }
            Err(SubmitFailure::AlreadySubmitted) => {
                self.answers = None;
                self.last_failure = Some(SubmitFailure::AlreadySubmitted);
                self.state = SessionState::AlreadySubmitted;
                Completion::AlreadySubmitted
            }
            Err(failure) => {
                let retryable = failure.is_retryable();
                self.last_failure = Some(failure);
                self.state = SessionState::Failed { retryable };
                Completion::Failed { retryable }
            }
        }
    }

    /// Return to answering after a retryable failure, with the clock re-armed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::TimeUp` if the countdown already expired, or
    /// `SessionError::InvalidTransition` outside `Failed { retryable: true }`.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.state != (SessionState::Failed { retryable: true }) {
            return Err(self.invalid("resume"));
        }
        if !self.countdown.resume() {
            return Err(SessionError::TimeUp);
        }
        self.state = SessionState::Active;
        Ok(())
    }

    /// Abandon the attempt. Nothing is sent; an in-flight result becomes stale.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` once a submission was recorded.
    pub fn abort(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Submitted | SessionState::AlreadySubmitted => Err(self.invalid("abort")),
            SessionState::Aborted => Ok(()),
            _ => {
                self.countdown.stop();
                self.answers = None;
                self.in_flight = None;
                self.state = SessionState::Aborted;
                Ok(())
            }
        }
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            action,
            state: self.state,
        }
    }
}

impl fmt::Debug for AssessmentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssessmentSession")
            .field("assessment_id", self.assessment.id())
            .field("state", &self.state)
            .field("remaining_secs", &self.countdown.remaining_secs())
            .field(
                "answered",
                &self.answers.as_ref().map(AnswerBuffer::answered_count),
            )
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssessmentDraft, AssessmentKind, QuestionDraft, SubjectId, UserId};
    use crate::time::fixed_now;
    use chrono::Duration;

    fn assessment(scheduled_start: Option<DateTime<Utc>>) -> Assessment {
        let mut draft = AssessmentDraft::new(AssessmentKind::Quiz, SubjectId::new("science"));
        draft.title = "Cells".into();
        draft.duration_minutes = 1;
        draft.scheduled_start = scheduled_start;
        draft.questions = (0..3)
            .map(|i| QuestionDraft::new(format!("Q{i}"), ["a", "b", "c", "d"], 1))
            .collect();
        draft
            .validate(AssessmentId::new("quiz-1"), UserId::new("teacher"), fixed_now())
            .unwrap()
    }

    fn started() -> AssessmentSession {
        let mut session = AssessmentSession::new(&assessment(None)).unwrap();
        session.start(fixed_now()).unwrap();
        session
    }

    fn submission(answers: Vec<usize>) -> Submission {
        Submission::from_persisted(
            AssessmentId::new("quiz-1"),
            UserId::new("student"),
            answers,
            fixed_now(),
            None,
            true,
            Uuid::nil(),
        )
        .unwrap()
    }

    fn tick_until_expired(session: &mut AssessmentSession) -> PendingSubmission {
        for _ in 0..600 {
            if let Tick::Expired(pending) = session.tick() {
                return pending;
            }
        }
        panic!("clock never expired");
    }

    #[test]
    fn session_copy_never_carries_answer_key() {
        let session = AssessmentSession::new(&assessment(None)).unwrap();
        assert!(!session.assessment().has_answer_key());
        assert_eq!(session.state(), SessionState::NotStarted);
        assert!(session.answers().is_none());
    }

    #[test]
    fn start_arms_clock_and_empty_buffer() {
        let session = started();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.remaining_secs(), 60);
        assert!(session.is_clock_running());
        assert_eq!(session.answers().unwrap().len(), 3);
        assert_eq!(session.answers().unwrap().answered_count(), 0);
    }

    #[test]
    fn starting_before_schedule_is_rejected_without_side_effects() {
        let opens_at = fixed_now() + Duration::minutes(10);
        let mut session = AssessmentSession::new(&assessment(Some(opens_at))).unwrap();

        let err = session.start(fixed_now()).unwrap_err();
        assert_eq!(err, SessionError::NotYetOpen { opens_at });
        assert_eq!(session.state(), SessionState::NotStarted);
        assert!(!session.is_clock_running());
        assert_eq!(session.remaining_secs(), 0);
        assert!(session.answers().is_none());
        assert_eq!(session.tick(), Tick::Inert);

        session.start(opens_at).unwrap();
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn expiry_auto_submits_with_defaults() {
        let mut session = started();
        session.set_answer(0, 2).unwrap();

        for remaining in (1..60).rev() {
            assert_eq!(
                session.tick(),
                Tick::Counting {
                    remaining_secs: remaining
                }
            );
        }
        let Tick::Expired(pending) = session.tick() else {
            panic!("expected expiry on the 60th tick");
        };
        assert_eq!(pending.trigger, SubmitTrigger::Expired);
        assert_eq!(pending.request.answers, vec![2, 0, 0]);
        assert_eq!(session.state(), SessionState::Submitting);

        for _ in 0..10 {
            assert_eq!(session.tick(), Tick::Inert);
        }
    }

    #[test]
    fn manual_submit_stops_clock_and_completes() {
        let mut session = started();
        session.set_answer(0, 1).unwrap();
        session.set_answer(1, 3).unwrap();
        session.set_answer(2, 0).unwrap();

        let pending = session.submit().unwrap();
        assert_eq!(pending.trigger, SubmitTrigger::Manual);
        assert_eq!(pending.request.answers, vec![1, 3, 0]);
        assert!(!session.is_clock_running());

        let completion = session.complete(pending.ticket, Ok(submission(vec![1, 3, 0])));
        assert_eq!(completion, Completion::Submitted);
        assert_eq!(session.state(), SessionState::Submitted);
        assert!(session.answers().is_none());
        assert_eq!(session.submission().unwrap().answers(), &[1, 3, 0]);
        assert_eq!(session.tick(), Tick::Inert);
        assert!(session.submit().is_err());
    }

    #[test]
    fn timeout_and_manual_payloads_are_identical() {
        let key = Uuid::new_v4();
        let mut manual = started().with_idempotency_key(key);
        let mut timed = started().with_idempotency_key(key);
        for session in [&mut manual, &mut timed] {
            session.set_answer(1, 2).unwrap();
        }

        let by_hand = manual.submit().unwrap();
        let by_clock = tick_until_expired(&mut timed);
        assert_eq!(by_hand.request, by_clock.request);
        assert_ne!(by_hand.trigger, by_clock.trigger);
    }

    #[test]
    fn expiry_during_manual_submission_is_a_noop() {
        let mut session = started();
        for _ in 0..59 {
            session.tick();
        }
        let pending = session.submit().unwrap();
        assert_eq!(session.tick(), Tick::Inert);
        assert_eq!(session.in_flight(), Some(pending.ticket));
    }

    #[test]
    fn answers_are_frozen_while_submitting() {
        let mut session = started();
        session.set_answer(0, 1).unwrap();
        let pending = session.submit().unwrap();

        let err = session.set_answer(0, 3).unwrap_err();
        assert_eq!(
            err,
            SessionError::AnswersFrozen {
                state: SessionState::Submitting
            }
        );
        assert_eq!(session.answers().unwrap().get(0), Some(1));
        assert_eq!(pending.request.answers, vec![1, 0, 0]);
    }

    #[test]
    fn transport_failure_preserves_buffer_and_retries_same_payload() {
        let mut session = started();
        session.set_answer(0, 3).unwrap();
        session.set_answer(2, 1).unwrap();

        let first = session.submit().unwrap();
        let completion = session.complete(
            first.ticket,
            Err(SubmitFailure::Transport("connection reset".into())),
        );
        assert_eq!(completion, Completion::Failed { retryable: true });
        assert_eq!(session.state(), SessionState::Failed { retryable: true });
        assert_eq!(session.answers().unwrap().to_submission_vector(), vec![3, 0, 1]);

        let second = session.submit().unwrap();
        assert_eq!(second.request, first.request);
        assert_ne!(second.ticket, first.ticket);
    }

    #[test]
    fn validation_failure_is_terminal() {
        let mut session = started();
        let pending = session.submit().unwrap();
        let completion =
            session.complete(pending.ticket, Err(SubmitFailure::Validation("bad".into())));
        assert_eq!(completion, Completion::Failed { retryable: false });
        assert!(session.state().is_terminal());
        assert!(session.submit().is_err());
        assert!(session.resume().is_err());
    }

    #[test]
    fn already_submitted_is_terminal_and_discards_buffer() {
        let mut session = started();
        session.set_answer(0, 1).unwrap();
        let pending = session.submit().unwrap();

        let completion = session.complete(pending.ticket, Err(SubmitFailure::AlreadySubmitted));
        assert_eq!(completion, Completion::AlreadySubmitted);
        assert_eq!(session.state(), SessionState::AlreadySubmitted);
        assert!(session.answers().is_none());
        assert!(session.submit().is_err());
        assert!(session.abort().is_err());
    }

    #[test]
    fn resume_rearms_remaining_time() {
        let mut session = started();
        for _ in 0..10 {
            session.tick();
        }
        let pending = session.submit().unwrap();
        session.complete(pending.ticket, Err(SubmitFailure::Transport("down".into())));

        session.resume().unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(
            session.tick(),
            Tick::Counting {
                remaining_secs: 49
            }
        );
        session.set_answer(1, 1).unwrap();
    }

    #[test]
    fn resume_after_timed_out_failure_is_time_up() {
        let mut session = started();
        let pending = tick_until_expired(&mut session);
        session.complete(pending.ticket, Err(SubmitFailure::Transport("down".into())));

        assert_eq!(session.resume().unwrap_err(), SessionError::TimeUp);
        let retry = session.submit().unwrap();
        assert_eq!(retry.request, pending.request);
    }

    #[test]
    fn abort_during_submission_discards_late_result() {
        let mut session = started();
        let pending = session.submit().unwrap();
        session.abort().unwrap();
        assert_eq!(session.state(), SessionState::Aborted);
        assert!(session.answers().is_none());

        let completion = session.complete(pending.ticket, Ok(submission(vec![0, 0, 0])));
        assert_eq!(completion, Completion::Stale);
        assert_eq!(session.state(), SessionState::Aborted);
        assert!(session.submission().is_none());
        session.abort().unwrap();
    }

    #[test]
    fn superseded_ticket_is_stale() {
        let mut session = started();
        let first = session.submit().unwrap();
        session.complete(first.ticket, Err(SubmitFailure::Transport("timeout".into())));
        let second = session.submit().unwrap();

        assert_eq!(
            session.complete(first.ticket, Ok(submission(vec![0, 0, 0]))),
            Completion::Stale
        );
        assert_eq!(session.state(), SessionState::Submitting);
        assert_eq!(
            session.complete(second.ticket, Ok(submission(vec![0, 0, 0]))),
            Completion::Submitted
        );
    }

    #[test]
    fn out_of_range_answers_fail_the_check() {
        let session = started();
        assert!(matches!(
            session.check_answer(5, 0),
            Err(SessionError::Answer(AnswerError::QuestionOutOfRange { .. }))
        ));
        assert!(matches!(
            session.check_answer(0, 9),
            Err(SessionError::Answer(AnswerError::OptionOutOfRange { .. }))
        ));
        assert!(session.check_answer(2, 3).is_ok());

        let idle = AssessmentSession::new(&assessment(None)).unwrap();
        assert!(matches!(
            idle.check_answer(0, 0),
            Err(SessionError::AnswersFrozen { .. })
        ));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "answer contract violation")]
    fn out_of_range_set_answer_is_fatal_in_debug_builds() {
        let _ = started().set_answer(5, 0);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn out_of_range_set_answer_is_ignored_in_release_builds() {
        let mut session = started();
        assert!(matches!(
            session.set_answer(0, 9),
            Err(SessionError::Answer(AnswerError::OptionOutOfRange { .. }))
        ));
        assert_eq!(session.answers().unwrap().answered_count(), 0);
    }

    #[test]
    fn abort_from_active_stops_everything() {
        let mut session = started();
        session.set_answer(0, 1).unwrap();
        session.abort().unwrap();
        assert!(!session.is_clock_running());
        assert_eq!(session.tick(), Tick::Inert);
        assert!(session.set_answer(0, 2).is_err());
    }
}
