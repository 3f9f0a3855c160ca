use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assess_core::model::{
    AssessmentDraft, AssessmentId, AssessmentKind, QuestionDraft, SubjectId, Submission, UserId,
};
use assess_core::session::{SessionState, SubmissionRequest};
use assess_core::time::fixed_now;
use chrono::{DateTime, Utc};
use services::attempts::TICK_PERIOD;
use services::{AttemptService, Clock, QueryCache, SessionEvent, SessionReport, TakerCommand};
use storage::repository::{
    AssessmentRepository, InMemoryRepository, StorageError, SubmissionRepository,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Submission repository that can fail or stall before delegating.
struct ScriptedSubmissions {
    inner: InMemoryRepository,
    failures_left: AtomicU32,
    delay: Option<Duration>,
    seen: Mutex<Vec<SubmissionRequest>>,
}

impl ScriptedSubmissions {
    fn new(inner: InMemoryRepository, failures: u32, delay: Option<Duration>) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            delay,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<SubmissionRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SubmissionRepository for ScriptedSubmissions {
    async fn submit_answers(
        &self,
        taker: &UserId,
        request: &SubmissionRequest,
        submitted_at: DateTime<Utc>,
    ) -> Result<Submission, StorageError> {
        self.seen.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StorageError::Connection("connection reset by peer".into()));
        }
        self.inner.submit_answers(taker, request, submitted_at).await
    }

    async fn list_for_taker(&self, taker: &UserId) -> Result<Vec<Submission>, StorageError> {
        self.inner.list_for_taker(taker).await
    }

    async fn list_for_assessment(
        &self,
        id: &AssessmentId,
    ) -> Result<Vec<Submission>, StorageError> {
        self.inner.list_for_assessment(id).await
    }

    async fn record_score(
        &self,
        id: &AssessmentId,
        taker: &UserId,
        score: u32,
    ) -> Result<Submission, StorageError> {
        self.inner.record_score(id, taker, score).await
    }
}

fn student() -> UserId {
    UserId::new("student")
}

fn quiz_id() -> AssessmentId {
    AssessmentId::new("quiz-1")
}

async fn fixture(
    failures: u32,
    delay: Option<Duration>,
) -> (Arc<ScriptedSubmissions>, AttemptService) {
    let inner = InMemoryRepository::new();
    let mut draft = AssessmentDraft::new(AssessmentKind::Quiz, SubjectId::new("science"));
    draft.title = "Cells".into();
    draft.duration_minutes = 1;
    draft.questions = vec![
        QuestionDraft::new("Q0", ["a", "b", "c", "d"], 2),
        QuestionDraft::new("Q1", ["a", "b", "c", "d"], 3),
        QuestionDraft::new("Q2", ["a", "b", "c", "d"], 0),
    ];
    let quiz = draft
        .validate(quiz_id(), UserId::new("teacher"), fixed_now())
        .unwrap();
    inner.upsert_assessment(&quiz).await.unwrap();

    let submissions = Arc::new(ScriptedSubmissions::new(inner.clone(), failures, delay));
    let service = AttemptService::new(
        Clock::fixed(fixed_now()),
        Arc::new(inner),
        submissions.clone(),
        Arc::new(QueryCache::new()),
    );
    (submissions, service)
}

struct Running {
    commands: mpsc::Sender<TakerCommand>,
    events: mpsc::Receiver<SessionEvent>,
    handle: JoinHandle<SessionReport>,
}

async fn start(service: AttemptService) -> Running {
    start_with_capacity(service, 512).await
}

async fn start_with_capacity(service: AttemptService, event_capacity: usize) -> Running {
    let session = service.begin(&student(), &quiz_id()).await.unwrap();
    let (commands, command_rx) = mpsc::channel(16);
    let (event_tx, events) = mpsc::channel(event_capacity);
    let handle = tokio::spawn(services::run_session(
        service,
        student(),
        session,
        command_rx,
        event_tx,
        TICK_PERIOD,
    ));
    Running {
        commands,
        events,
        handle,
    }
}

async fn wait_for(
    events: &mut mpsc::Receiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = events.recv().await.expect("driver ended early");
        if wanted(&event) {
            return event;
        }
    }
}

fn drain(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn expiry_submits_buffer_with_defaults() {
    let (repo, service) = fixture(0, None).await;
    let mut run = start(service).await;
    let began = tokio::time::Instant::now();

    run.commands
        .send(TakerCommand::Answer {
            question: 0,
            option: 2,
        })
        .await
        .unwrap();
    let report = run.handle.await.unwrap();

    assert_eq!(report.state, SessionState::Submitted);
    assert_eq!(report.attempts, 1);
    let submission = report.submission.expect("submitted");
    assert_eq!(submission.answers(), &[2, 0, 0]);
    assert_eq!(submission.score(), Some(2));
    assert_eq!(began.elapsed(), Duration::from_secs(60));
    assert_eq!(repo.seen().len(), 1);

    let events = drain(&mut run.events);
    let ticks = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Tick { .. }))
        .count();
    assert_eq!(ticks, 60);
    assert!(events.contains(&SessionEvent::Submitting {
        expired: true,
        unanswered: vec![1, 2],
    }));
    assert!(matches!(events.last(), Some(SessionEvent::Submitted { .. })));
}

#[tokio::test(start_paused = true)]
async fn undrained_event_channel_does_not_stall_the_countdown() {
    let (repo, service) = fixture(0, None).await;
    let mut run = start_with_capacity(service, 4).await;

    run.commands
        .send(TakerCommand::Answer {
            question: 0,
            option: 1,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    // Expiry fired on time even though nobody read a single event.
    let seen = repo.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].answers, vec![1, 0, 0]);

    let buffered = drain(&mut run.events);
    assert_eq!(buffered.len(), 4);
    assert!(matches!(buffered[0], SessionEvent::Started { .. }));
    drop(run.events);

    let report = run.handle.await.unwrap();
    assert_eq!(report.state, SessionState::Submitted);
    assert_eq!(report.submission.unwrap().answers(), &[1, 0, 0]);
}

#[tokio::test(start_paused = true)]
async fn manual_submit_stops_the_clock() {
    let (repo, service) = fixture(0, None).await;
    let mut run = start(service).await;

    for (question, option) in [(0, 1), (1, 3), (2, 0)] {
        run.commands
            .send(TakerCommand::Answer { question, option })
            .await
            .unwrap();
    }
    run.commands.send(TakerCommand::Submit).await.unwrap();
    let report = run.handle.await.unwrap();

    assert_eq!(report.state, SessionState::Submitted);
    assert_eq!(report.submission.unwrap().answers(), &[1, 3, 0]);
    assert_eq!(repo.seen()[0].answers, vec![1, 3, 0]);

    // Nothing else reaches the repository once submitted.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(repo.seen().len(), 1);
    let events = drain(&mut run.events);
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::Tick { .. })));
}

#[tokio::test(start_paused = true)]
async fn transport_failure_keeps_answers_for_retry() {
    let (repo, service) = fixture(1, None).await;
    let mut run = start(service).await;

    run.commands
        .send(TakerCommand::Answer {
            question: 0,
            option: 3,
        })
        .await
        .unwrap();
    run.commands.send(TakerCommand::Submit).await.unwrap();

    let failed = wait_for(&mut run.events, |e| {
        matches!(e, SessionEvent::SubmitFailed { .. })
    })
    .await;
    assert!(matches!(
        failed,
        SessionEvent::SubmitFailed {
            retryable: true,
            ..
        }
    ));

    run.commands.send(TakerCommand::Submit).await.unwrap();
    let report = run.handle.await.unwrap();

    assert_eq!(report.state, SessionState::Submitted);
    assert_eq!(report.attempts, 2);
    let seen = repo.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[1].answers, vec![3, 0, 0]);
}

#[tokio::test(start_paused = true)]
async fn resume_after_failure_continues_countdown() {
    let (_repo, service) = fixture(1, None).await;
    let mut run = start(service).await;

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    run.commands.send(TakerCommand::Submit).await.unwrap();
    wait_for(&mut run.events, |e| {
        matches!(e, SessionEvent::SubmitFailed { .. })
    })
    .await;

    run.commands.send(TakerCommand::Resume).await.unwrap();
    let resumed = wait_for(&mut run.events, |e| {
        matches!(e, SessionEvent::Resumed { .. })
    })
    .await;
    assert_eq!(resumed, SessionEvent::Resumed { remaining_secs: 50 });

    run.commands
        .send(TakerCommand::Answer {
            question: 1,
            option: 1,
        })
        .await
        .unwrap();
    let report = run.handle.await.unwrap();
    assert_eq!(report.state, SessionState::Submitted);
    assert_eq!(report.submission.unwrap().answers(), &[0, 1, 0]);
}

#[tokio::test(start_paused = true)]
async fn closing_commands_aborts_without_submitting() {
    let (repo, service) = fixture(0, None).await;
    let run = start(service).await;

    drop(run.commands);
    let report = run.handle.await.unwrap();

    assert_eq!(report.state, SessionState::Aborted);
    assert!(report.submission.is_none());
    assert!(repo.seen().is_empty());
}

#[tokio::test(start_paused = true)]
async fn abort_during_submission_ignores_late_result() {
    let (repo, service) = fixture(0, Some(Duration::from_secs(5))).await;
    let mut run = start(service).await;

    run.commands.send(TakerCommand::Submit).await.unwrap();
    wait_for(&mut run.events, |e| {
        matches!(e, SessionEvent::Submitting { .. })
    })
    .await;
    run.commands.send(TakerCommand::Abort).await.unwrap();
    let report = run.handle.await.unwrap();

    assert_eq!(report.state, SessionState::Aborted);
    assert!(report.submission.is_none());

    // The in-flight call is not cancelled; its result just has nowhere to go.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(repo.seen().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn answers_are_rejected_while_submitting() {
    let (_repo, service) = fixture(0, Some(Duration::from_secs(5))).await;
    let mut run = start(service).await;

    run.commands.send(TakerCommand::Submit).await.unwrap();
    run.commands
        .send(TakerCommand::Answer {
            question: 0,
            option: 1,
        })
        .await
        .unwrap();

    let rejected = wait_for(&mut run.events, |e| {
        matches!(e, SessionEvent::Rejected { .. })
    })
    .await;
    assert!(matches!(rejected, SessionEvent::Rejected { reason } if reason.contains("frozen")));

    let report = run.handle.await.unwrap();
    assert_eq!(report.submission.unwrap().answers(), &[0, 0, 0]);
}

#[tokio::test(start_paused = true)]
async fn out_of_range_answer_is_rejected_and_session_continues() {
    let (_repo, service) = fixture(0, None).await;
    let mut run = start(service).await;

    run.commands
        .send(TakerCommand::Answer {
            question: 7,
            option: 0,
        })
        .await
        .unwrap();
    wait_for(&mut run.events, |e| {
        matches!(e, SessionEvent::Rejected { .. })
    })
    .await;

    run.commands
        .send(TakerCommand::Answer {
            question: 2,
            option: 2,
        })
        .await
        .unwrap();
    let answered = wait_for(&mut run.events, |e| {
        matches!(e, SessionEvent::Answered { .. })
    })
    .await;
    assert_eq!(
        answered,
        SessionEvent::Answered {
            question: 2,
            option: 2,
            answered: 1,
            total: 3,
        }
    );

    run.commands.send(TakerCommand::Abort).await.unwrap();
    assert_eq!(run.handle.await.unwrap().state, SessionState::Aborted);
}

#[tokio::test]
async fn events_serialize_with_tag() {
    let json = serde_json::to_value(SessionEvent::SubmitFailed {
        message: "timeout".into(),
        retryable: true,
    })
    .unwrap();
    assert_eq!(json["event"], "submit_failed");
    assert_eq!(json["retryable"], true);
}
