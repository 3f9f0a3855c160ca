use std::fmt;

use assess_core::model::{
    AssessmentDraft, AssessmentId, AssessmentKind, QuestionDraft, SubjectId, UserId,
};
use chrono::{DateTime, Duration, Utc};
use storage::repository::Storage;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    subject: SubjectId,
    author: UserId,
    exam_in_minutes: i64,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidSubject { raw: String },
    InvalidExamOffset { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidSubject { raw } => write!(f, "invalid --subject value: {raw}"),
            ArgsError::InvalidExamOffset { raw } => {
                write!(f, "invalid --exam-in value (expected minutes): {raw}")
            }
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
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

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("ASSESS_DB_URL")
            .unwrap_or_else(|_| "sqlite:assess.sqlite3?mode=rwc".into());
        let mut subject = SubjectId::new(
            std::env::var("ASSESS_SUBJECT").unwrap_or_else(|_| "science".into()),
        );
        let mut author =
            UserId::new(std::env::var("ASSESS_AUTHOR").unwrap_or_else(|_| "teacher".into()));
        let mut exam_in_minutes = 2;
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--subject" => {
                    let value = require_value(&mut args, "--subject")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidSubject { raw: value });
                    }
                    subject = SubjectId::new(value.trim());
                }
                "--author" => {
                    author = UserId::new(require_value(&mut args, "--author")?);
                }
                "--exam-in" => {
                    let value = require_value(&mut args, "--exam-in")?;
                    exam_in_minutes = value
                        .parse::<i64>()
                        .map_err(|_| ArgsError::InvalidExamOffset { raw: value.clone() })?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            subject,
            author,
            exam_in_minutes,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:assess.sqlite3?mode=rwc)");
    eprintln!("  --subject <id>            Subject owning the demo assessments (default: science)");
    eprintln!("  --author <id>             Author principal (default: teacher)");
    eprintln!("  --exam-in <minutes>       Exam opens this many minutes after now (default: 2)");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  ASSESS_DB_URL, ASSESS_SUBJECT, ASSESS_AUTHOR");
}

fn demo_questions() -> Vec<QuestionDraft> {
    vec![
        QuestionDraft::new(
            "Which organelle produces most of a cell's ATP?",
            ["Nucleus", "Mitochondrion", "Ribosome", "Golgi apparatus"],
            1,
        ),
        QuestionDraft::new(
            "What is the chemical symbol for sodium?",
            ["S", "So", "Na", "Sd"],
            2,
        ),
        QuestionDraft::new(
            "Which planet is closest to the sun?",
            ["Mercury", "Venus", "Earth", "Mars"],
            0,
        ),
    ]
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let mut quiz = AssessmentDraft::new(AssessmentKind::Quiz, args.subject.clone());
    quiz.title = "Warm-up quiz".into();
    quiz.duration_minutes = 1;
    quiz.questions = demo_questions();
    let quiz = quiz.validate(
        AssessmentId::new(format!("{}-quiz", args.subject)),
        args.author.clone(),
        now,
    )?;
    storage.assessments.upsert_assessment(&quiz).await?;

    let mut exam = AssessmentDraft::new(AssessmentKind::Exam, args.subject.clone());
    exam.title = "Midterm".into();
    exam.duration_minutes = 5;
    exam.scheduled_start = Some(now + Duration::minutes(args.exam_in_minutes));
    exam.questions = demo_questions();
    let exam = exam.validate(
        AssessmentId::new(format!("{}-exam", args.subject)),
        args.author.clone(),
        now,
    )?;
    storage.assessments.upsert_assessment(&exam).await?;

    println!(
        "Seeded {} and {} into subject {} ({})",
        quiz.id(),
        exam.id(),
        args.subject,
        args.db_url
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
