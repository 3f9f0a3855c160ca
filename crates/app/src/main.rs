use std::fmt;
use std::io::BufRead;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use assess_core::model::{AssessmentId, SubjectId, UserId};
use assess_core::session::{AssessmentSession, UNANSWERED_OPTION};
use services::attempts::TICK_PERIOD;
use services::{
    AppServices, AttemptView, Availability, Clock, SessionEvent, TakerCommand, format_countdown,
    run_session,
};
use storage::http::HttpConfig;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    MissingCommand,
    UnknownCommand(String),
    MissingOperand { command: &'static str, operand: &'static str },
    InvalidDbUrl { raw: String },
    InvalidUser { raw: String },
    InvalidScore { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::MissingCommand => write!(f, "missing subcommand"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::MissingOperand { command, operand } => {
                write!(f, "{command} requires <{operand}>")
            }
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUser { raw } => write!(f, "invalid --user value: {raw}"),
            ArgsError::InvalidScore { raw } => write!(f, "invalid score: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- [options] list");
    eprintln!("  cargo run -p app -- [options] take <assessment_id>");
    eprintln!("  cargo run -p app -- [options] results");
    eprintln!("  cargo run -p app -- [options] submissions <assessment_id>");
    eprintln!("  cargo run -p app -- [options] grade <assessment_id> <taker> <score>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>     SQLite database (default: sqlite:assess.sqlite3)");
    eprintln!("  --api <url>           Use the remote backend instead of SQLite");
    eprintln!("  --token <token>       Bearer token for the remote backend");
    eprintln!("  --user <id>           Acting principal (default: student)");
    eprintln!("  --subject <id>        Subject to list (default: science)");
    eprintln!("  --json                Print one JSON document per line");
    eprintln!();
    eprintln!("While taking an assessment, type one command per line:");
    eprintln!("  a <question> <option>   choose an option (0-based)");
    eprintln!("  submit                  submit now");
    eprintln!("  resume                  keep answering after a failed submission");
    eprintln!("  abort                   abandon the attempt (end of input does the same)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  ASSESS_DB_URL, ASSESS_API_URL, ASSESS_API_TOKEN, ASSESS_USER, ASSESS_SUBJECT");
    eprintln!("  RUST_LOG (default: info, written to stderr)");
}

#[derive(Debug, Clone)]
enum Backend {
    Sqlite { db_url: String },
    Http { base_url: String, token: Option<String> },
}

#[derive(Debug, Clone)]
enum Command {
    List,
    Take { id: AssessmentId },
    Results,
    Submissions { id: AssessmentId },
    Grade { id: AssessmentId, taker: UserId, score: u32 },
}

struct Args {
    backend: Backend,
    user: UserId,
    subject: SubjectId,
    json: bool,
    command: Command,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("ASSESS_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://assess.sqlite3".into(), normalize_sqlite_url);
        let mut api_url = std::env::var("ASSESS_API_URL").ok();
        let mut token = std::env::var("ASSESS_API_TOKEN").ok();
        let mut user =
            UserId::new(std::env::var("ASSESS_USER").unwrap_or_else(|_| "student".into()));
        let mut subject = SubjectId::new(
            std::env::var("ASSESS_SUBJECT").unwrap_or_else(|_| "science".into()),
        );
        let mut json = false;
        let mut operands = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--api" => api_url = Some(require_value(args, "--api")?),
                "--token" => token = Some(require_value(args, "--token")?),
                "--user" => {
                    let value = require_value(args, "--user")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidUser { raw: value });
                    }
                    user = UserId::new(value.trim());
                }
                "--subject" => subject = SubjectId::new(require_value(args, "--subject")?),
                "--json" => json = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ if arg.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => operands.push(arg),
            }
        }

        let backend = match api_url {
            Some(base_url) => Backend::Http { base_url, token },
            None => Backend::Sqlite { db_url },
        };

        Ok(Self {
            backend,
            user,
            subject,
            json,
            command: Command::from_operands(operands)?,
        })
    }
}

impl Command {
    fn from_operands(operands: Vec<String>) -> Result<Self, ArgsError> {
        let mut operands = operands.into_iter();
        let name = operands.next().ok_or(ArgsError::MissingCommand)?;
        let mut operand = |command: &'static str, what: &'static str| {
            operands.next().ok_or(ArgsError::MissingOperand {
                command,
                operand: what,
            })
        };

        let command = match name.as_str() {
            "list" => Self::List,
            "results" => Self::Results,
            "take" => Self::Take {
                id: AssessmentId::new(operand("take", "assessment_id")?),
            },
            "submissions" => Self::Submissions {
                id: AssessmentId::new(operand("submissions", "assessment_id")?),
            },
            "grade" => {
                let id = AssessmentId::new(operand("grade", "assessment_id")?);
                let taker = UserId::new(operand("grade", "taker")?);
                let raw = operand("grade", "score")?;
                let score = raw
                    .parse::<u32>()
                    .map_err(|_| ArgsError::InvalidScore { raw: raw.clone() })?;
                Self::Grade { id, taker, score }
            }
            _ => return Err(ArgsError::UnknownCommand(name)),
        };

        match operands.next() {
            Some(extra) => Err(ArgsError::UnknownArg(extra)),
            None => Ok(command),
        }
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn describe(availability: &Availability) -> String {
    match availability {
        Availability::Available => "available".to_string(),
        Availability::NotYetOpen { opens_at } => format!("opens at {opens_at}"),
        Availability::Completed {
            score: Some(score),
            percentage,
            ..
        } => format!(
            "completed, score {score} ({}%)",
            percentage.unwrap_or_default()
        ),
        Availability::Completed { score: None, .. } => "completed, awaiting grading".to_string(),
    }
}

/// Parse one line typed by the taker. Blank lines are ignored.
fn parse_taker_command(line: &str) -> Result<Option<TakerCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(None);
    };
    let command = match word {
        "a" | "answer" => {
            let mut index = |what: &str| {
                words
                    .next()
                    .and_then(|raw| raw.parse::<usize>().ok())
                    .ok_or_else(|| format!("expected: a <question> <option> ({what} missing)"))
            };
            let question = index("question")?;
            let option = index("option")?;
            TakerCommand::Answer { question, option }
        }
        "submit" | "s" => TakerCommand::Submit,
        "resume" | "r" => TakerCommand::Resume,
        "abort" | "q" => TakerCommand::Abort,
        other => return Err(format!("unrecognized input: {other}")),
    };
    Ok(Some(command))
}

/// Forward stdin lines as taker commands. End of input drops the sender.
fn spawn_stdin_reader(commands: mpsc::Sender<TakerCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_taker_command(&line) {
                Ok(Some(command)) => {
                    if commands.blocking_send(command).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(message) => eprintln!("{message}"),
            }
        }
    });
}

fn header_line(session: &AssessmentSession) -> String {
    let view = AttemptView::from_session(session);
    format!(
        "{} ({}, {}/{} answered, {} left)",
        view.title,
        session.assessment().kind().as_str(),
        view.answered,
        view.total,
        view.remaining
    )
}

fn print_session_header(session: &AssessmentSession) {
    println!("{}", header_line(session));
    for (index, question) in session.assessment().questions().iter().enumerate() {
        println!("[{index}] {}", question.prompt());
        for (option, text) in question.options().iter().enumerate() {
            println!("    {option}) {text}");
        }
    }
}

fn render_event(event: &SessionEvent) {
    match event {
        SessionEvent::Started { remaining_secs, .. } => {
            println!("Started. {} remaining", format_countdown(*remaining_secs));
        }
        SessionEvent::Tick { remaining_secs } => {
            if remaining_secs % 60 == 0 || *remaining_secs <= 10 {
                println!("{} left", format_countdown(*remaining_secs));
            }
        }
        SessionEvent::Answered {
            question,
            option,
            answered,
            total,
        } => println!("[{question}] -> {option} ({answered}/{total} answered)"),
        SessionEvent::Submitting {
            expired,
            unanswered,
        } => {
            if *expired {
                println!("Time is up. Submitting...");
            } else {
                println!("Submitting...");
            }
            if !unanswered.is_empty() {
                println!("Unanswered {unanswered:?} recorded as option {UNANSWERED_OPTION}");
            }
        }
        SessionEvent::Submitted {
            score: Some(score),
            percentage,
        } => println!(
            "Submitted. Score {score} ({}%)",
            percentage.unwrap_or_default()
        ),
        SessionEvent::Submitted { score: None, .. } => println!("Submitted. Awaiting grading"),
        SessionEvent::AlreadySubmitted => println!("This assessment was already completed"),
        SessionEvent::SubmitFailed { message, retryable } => {
            if *retryable {
                println!("{message}. Type `submit` to retry or `resume` to keep answering");
            } else {
                println!("{message}");
            }
        }
        SessionEvent::Resumed { remaining_secs } => {
            println!("Resumed. {} remaining", format_countdown(*remaining_secs));
        }
        SessionEvent::Rejected { reason } => println!("Rejected: {reason}"),
        SessionEvent::Aborted => println!("Attempt abandoned"),
    }
}

async fn take(
    services: &AppServices,
    taker: &UserId,
    id: &AssessmentId,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let attempts = services.attempts();
    let session = attempts.begin(taker, id).await?;
    if json {
        print_json(&AttemptView::from_session(&session))?;
    } else {
        print_session_header(&session);
    }

    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, mut event_rx) = mpsc::channel(64);
    spawn_stdin_reader(command_tx);
    let driver = tokio::spawn(run_session(
        (*attempts).clone(),
        taker.clone(),
        session,
        command_rx,
        event_tx,
        TICK_PERIOD,
    ));

    while let Some(event) = event_rx.recv().await {
        if json {
            print_json(&event)?;
        } else {
            render_event(&event);
        }
    }

    let report = driver.await?;
    tracing::debug!(state = %report.state, attempts = report.attempts, "attempt ended");
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    init_tracing();

    let clock = Clock::system();
    let services = match &args.backend {
        Backend::Sqlite { db_url } => {
            prepare_sqlite_file(db_url)?;
            AppServices::new_sqlite(db_url, clock).await?
        }
        Backend::Http { base_url, token } => {
            AppServices::new_http(HttpConfig::new(base_url, token.clone())?, clock)?
        }
    };

    match &args.command {
        Command::List => {
            let items = services
                .catalog()
                .assessments_for(&args.subject, &args.user)
                .await?;
            if args.json {
                return Ok(print_json(&items)?);
            }
            if items.is_empty() {
                println!("No assessments in {}", args.subject);
            }
            for item in &items {
                println!(
                    "{}  {}  {}  {} questions, {} min  {}",
                    item.id,
                    item.kind.as_str(),
                    item.title,
                    item.question_count,
                    item.duration_minutes,
                    describe(&item.availability)
                );
            }
        }
        Command::Take { id } => take(&services, &args.user, id, args.json).await?,
        Command::Results => {
            let results = services.catalog().my_results(&args.user).await?;
            if args.json {
                return Ok(print_json(&results)?);
            }
            for result in &results {
                let grade = match (result.score, result.percentage) {
                    (Some(score), Some(percentage)) => {
                        format!("{score}/{} ({percentage}%)", result.total)
                    }
                    _ => "awaiting grading".to_string(),
                };
                println!(
                    "{}  {}  {}  {grade}",
                    result.assessment_id,
                    result.title.as_deref().unwrap_or("(removed)"),
                    result.submitted_at
                );
            }
        }
        Command::Submissions { id } => {
            let submissions = services.authoring().submissions_for(id).await?;
            for submission in submissions.iter() {
                let score = submission
                    .score()
                    .map_or_else(|| "ungraded".to_string(), |s| s.to_string());
                println!(
                    "{}  {}  {:?}  {score}",
                    submission.taker(),
                    submission.submitted_at(),
                    submission.answers()
                );
            }
        }
        Command::Grade { id, taker, score } => {
            let graded = services
                .authoring()
                .record_score(&args.user, id, taker, *score)
                .await?;
            println!(
                "Graded {} for {}: {}%",
                id,
                taker,
                graded.percentage().unwrap_or_default()
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Result<Args, ArgsError> {
        Args::parse(&mut raw.iter().map(ToString::to_string))
    }

    #[test]
    fn parses_grade_operands_and_flags_in_any_order() {
        let parsed = args(&["grade", "--user", "teacher", "science-exam", "ana", "2"]).unwrap();
        assert_eq!(parsed.user, UserId::new("teacher"));
        match parsed.command {
            Command::Grade { id, taker, score } => {
                assert_eq!(id, AssessmentId::new("science-exam"));
                assert_eq!(taker, UserId::new("ana"));
                assert_eq!(score, 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn api_flag_selects_the_remote_backend() {
        let parsed = args(&["--api", "https://api.example.test", "list"]).unwrap();
        assert!(matches!(parsed.backend, Backend::Http { .. }));
    }

    #[test]
    fn rejects_missing_operands() {
        assert!(matches!(
            args(&["take"]),
            Err(ArgsError::MissingOperand {
                command: "take",
                ..
            })
        ));
        assert!(matches!(args(&[]), Err(ArgsError::MissingCommand)));
        assert!(matches!(
            args(&["grade", "x", "y", "many"]),
            Err(ArgsError::InvalidScore { .. })
        ));
    }

    #[test]
    fn taker_lines_map_to_commands() {
        assert_eq!(
            parse_taker_command("a 2 3"),
            Ok(Some(TakerCommand::Answer {
                question: 2,
                option: 3
            }))
        );
        assert_eq!(parse_taker_command("  submit "), Ok(Some(TakerCommand::Submit)));
        assert_eq!(parse_taker_command(""), Ok(None));
        assert!(parse_taker_command("a 1").is_err());
        assert!(parse_taker_command("hello").is_err());
    }

    #[test]
    fn sqlite_urls_become_absolute() {
        let url = normalize_sqlite_url("sqlite:data/assess.sqlite3".into());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/assess.sqlite3"));
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
    }

    #[test]
    fn header_line_summarizes_a_fresh_attempt() {
        use assess_core::model::{AssessmentDraft, AssessmentKind, QuestionDraft};
        use assess_core::time::fixed_now;

        let mut draft = AssessmentDraft::new(AssessmentKind::Quiz, SubjectId::new("math"));
        draft.title = "Sums".into();
        draft.duration_minutes = 2;
        draft.questions = vec![
            QuestionDraft::new("1+1", ["1", "2", "3", "4"], 1),
            QuestionDraft::new("2+2", ["1", "2", "3", "4"], 3),
        ];
        let assessment = draft
            .validate(AssessmentId::new("quiz-1"), UserId::new("teacher"), fixed_now())
            .unwrap();
        let mut session = AssessmentSession::new(&assessment).unwrap();
        session.start(fixed_now()).unwrap();
        session.set_answer(0, 1).unwrap();

        assert_eq!(header_line(&session), "Sums (quiz, 1/2 answered, 02:00 left)");
    }
}
