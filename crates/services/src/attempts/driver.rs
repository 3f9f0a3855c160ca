use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use assess_core::model::{Submission, UserId};
use assess_core::session::{
    AssessmentSession, Completion, PendingSubmission, SessionError, SessionState,
    SubmissionTicket, SubmitFailure, SubmitTrigger, Tick,
};

use super::service::AttemptService;
use super::ticker::SessionTicker;

/// Countdown resolution used by the binary.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Something the taker did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakerCommand {
    Answer { question: usize, option: usize },
    Submit,
    Resume,
    Abort,
}

/// What the taker should be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        remaining_secs: u32,
        questions: usize,
    },
    Tick {
        remaining_secs: u32,
    },
    Answered {
        question: usize,
        option: usize,
        answered: usize,
        total: usize,
    },
    Submitting {
        expired: bool,
        unanswered: Vec<usize>,
    },
    Submitted {
        score: Option<u32>,
        percentage: Option<u32>,
    },
    AlreadySubmitted,
    SubmitFailed {
        message: String,
        retryable: bool,
    },
    Resumed {
        remaining_secs: u32,
    },
    Rejected {
        reason: String,
    },
    Aborted,
}

/// How a driven session ended.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub state: SessionState,
    pub submission: Option<Submission>,
    pub attempts: u32,
}

type Delivery = (SubmissionTicket, Result<Submission, SubmitFailure>);

struct Driver {
    service: AttemptService,
    taker: UserId,
    session: AssessmentSession,
    ticker: SessionTicker,
    events: mpsc::Sender<SessionEvent>,
    delivered_tx: mpsc::Sender<Delivery>,
    attempts: u32,
}

/// Drive one session to a terminal state.
///
/// A single loop owns the session: taker commands, clock ticks and repository
/// results are handled one at a time. Repository calls run on spawned tasks so
/// the loop keeps ticking (inertly) while a submission is in flight. Closing the
/// command channel aborts the session.
pub async fn run_session(
    service: AttemptService,
    taker: UserId,
    session: AssessmentSession,
    mut commands: mpsc::Receiver<TakerCommand>,
    events: mpsc::Sender<SessionEvent>,
    tick_period: Duration,
) -> SessionReport {
    let (delivered_tx, mut delivered_rx) = mpsc::channel::<Delivery>(1);
    let mut driver = Driver {
        service,
        taker,
        session,
        ticker: SessionTicker::new(tick_period),
        events,
        delivered_tx,
        attempts: 0,
    };

    driver.sync_ticker();
    driver
        .emit(SessionEvent::Started {
            remaining_secs: driver.session.remaining_secs(),
            questions: driver.session.assessment().question_count(),
        })
        .await;

    while !driver.session.state().is_terminal() {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => driver.handle(command).await,
                None => {
                    tracing::info!(
                        assessment_id = %driver.session.assessment().id(),
                        "command channel closed, aborting session"
                    );
                    driver.handle(TakerCommand::Abort).await;
                }
            },
            () = driver.ticker.tick() => driver.on_tick().await,
            Some((ticket, result)) = delivered_rx.recv() => {
                driver.on_delivered(ticket, result).await;
            }
        }
        driver.sync_ticker();
    }

    tracing::info!(
        assessment_id = %driver.session.assessment().id(),
        state = %driver.session.state(),
        attempts = driver.attempts,
        "session finished"
    );
    SessionReport {
        state: driver.session.state(),
        submission: driver.session.submission().cloned(),
        attempts: driver.attempts,
    }
}

impl Driver {
    /// Publish an event to the taker.
    ///
    /// Ticks and anything emitted while the countdown runs never wait for the
    /// receiver: a lagging consumer loses those events instead of freezing the
    /// clock. Outcome events are only produced with the clock stopped and are
    /// delivered reliably.
    async fn emit(&self, event: SessionEvent) {
        let lossy =
            matches!(event, SessionEvent::Tick { .. }) || self.session.is_clock_running();
        if !lossy {
            if self.events.send(event).await.is_err() {
                tracing::debug!("session event receiver dropped");
            }
            return;
        }
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!(?event, "session event receiver lagging, event dropped");
            }
            Err(TrySendError::Closed(_)) => tracing::debug!("session event receiver dropped"),
        }
    }

    fn sync_ticker(&mut self) {
        match (self.session.is_clock_running(), self.ticker.is_running()) {
            (true, false) => self.ticker.start(),
            (false, true) => self.ticker.stop(),
            _ => {}
        }
    }

    async fn handle(&mut self, command: TakerCommand) {
        let outcome = match command {
            TakerCommand::Answer { question, option } => self
                .session
                .check_answer(question, option)
                .and_then(|()| self.session.set_answer(question, option))
                .map(|()| {
                    let answers = self.session.answers();
                    SessionEvent::Answered {
                        question,
                        option,
                        answered: answers.map_or(0, |a| a.answered_count()),
                        total: answers.map_or(0, |a| a.len()),
                    }
                }),
            TakerCommand::Submit => match self.session.submit() {
                Ok(pending) => {
                    self.dispatch(pending).await;
                    return;
                }
                Err(e) => Err(e),
            },
            TakerCommand::Resume => self.session.resume().map(|()| SessionEvent::Resumed {
                remaining_secs: self.session.remaining_secs(),
            }),
            TakerCommand::Abort => self.session.abort().map(|()| SessionEvent::Aborted),
        };

        match outcome {
            Ok(event) => self.emit(event).await,
            Err(error) => {
                if matches!(error, SessionError::Answer(_)) {
                    tracing::warn!(?command, %error, "rejected out-of-range answer");
                } else {
                    tracing::debug!(?command, %error, "rejected command");
                }
                self.emit(SessionEvent::Rejected {
                    reason: error.to_string(),
                })
                .await;
            }
        }
    }

    async fn on_tick(&mut self) {
        match self.session.tick() {
            Tick::Inert => {}
            Tick::Counting { remaining_secs } => {
                self.emit(SessionEvent::Tick { remaining_secs }).await;
            }
            Tick::Expired(pending) => {
                self.emit(SessionEvent::Tick { remaining_secs: 0 }).await;
                self.dispatch(pending).await;
            }
        }
    }

    async fn dispatch(&mut self, pending: PendingSubmission) {
        self.attempts += 1;
        let unanswered = self
            .session
            .answers()
            .map(|a| a.unanswered())
            .unwrap_or_default();
        if !unanswered.is_empty() {
            tracing::info!(
                assessment_id = %pending.request.assessment_id,
                ?unanswered,
                "unanswered questions submitted with the default option"
            );
        }
        let expired = pending.trigger == SubmitTrigger::Expired;

        let service = self.service.clone();
        let taker = self.taker.clone();
        let delivered = self.delivered_tx.clone();
        tokio::spawn(async move {
            let result = service.send(&taker, &pending).await;
            // The driver is gone once the session ended; the result is moot then.
            let _ = delivered.send((pending.ticket, result)).await;
        });

        self.emit(SessionEvent::Submitting {
            expired,
            unanswered,
        })
        .await;
    }

    async fn on_delivered(
        &mut self,
        ticket: SubmissionTicket,
        result: Result<Submission, SubmitFailure>,
    ) {
        match self.session.complete(ticket, result) {
            Completion::Submitted => {
                let submission = self.session.submission();
                self.emit(SessionEvent::Submitted {
                    score: submission.and_then(Submission::score),
                    percentage: submission.and_then(Submission::percentage),
                })
                .await;
            }
            Completion::AlreadySubmitted => self.emit(SessionEvent::AlreadySubmitted).await,
            Completion::Failed { retryable } => {
                let message = self
                    .session
                    .last_failure()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                self.emit(SessionEvent::SubmitFailed { message, retryable })
                    .await;
            }
            Completion::Stale => {
                tracing::debug!(ticket = ticket.value(), "discarded stale submission result");
            }
        }
    }
}
