//! Repository adapter for a remote assessment backend reached over JSON/HTTP.
//!
//! Every operation is a `POST {base}/{method}` with a JSON body. Failures are
//! reported as `StorageError` so the session layer can classify them.

use std::sync::Arc;
use std::time::Duration;

use assess_core::model::{Assessment, AssessmentId, SubjectId, Submission, UserId};
use assess_core::session::SubmissionRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::repository::{AssessmentRepository, Storage, StorageError, SubmissionRepository};

pub mod wire;

use wire::{AssessmentDto, ById, BySubject, ByTaker, RecordScore, SubmissionDto, SubmitAnswers};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HttpConfigError {
    #[error("invalid backend url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("backend url must use http or https, got {0}")]
    UnsupportedScheme(String),

    #[error(transparent)]
    Client(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct HttpConfig {
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
}

impl HttpConfig {
    /// Validate `base_url` and build a config.
    ///
    /// # Errors
    ///
    /// Returns `HttpConfigError` if the URL does not parse or is not http(s).
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, HttpConfigError> {
        let mut base_url = Url::parse(base_url.trim())?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(HttpConfigError::UnsupportedScheme(base_url.scheme().to_string()));
        }
        // `Url::join` replaces the last segment unless the path ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, method: &str) -> Result<Url, StorageError> {
        self.base_url
            .join(method)
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

impl std::fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConfig")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct HttpRepository {
    client: Client,
    config: HttpConfig,
}

impl HttpRepository {
    /// # Errors
    ///
    /// Returns `HttpConfigError::Client` if the HTTP client cannot be built.
    pub fn new(config: HttpConfig) -> Result<Self, HttpConfigError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn post<B>(&self, method: &str, body: &B) -> Result<reqwest::Response, StorageError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = self.config.endpoint(method)?;
        let mut request = self.client.post(url).json(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(method, error = %e, "backend request failed");
            StorageError::Connection(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::debug!(method, %status, "backend returned an error status");
            return Err(status_error(status, detail));
        }
        Ok(response)
    }

    async fn call<B, R>(&self, method: &str, body: &B) -> Result<R, StorageError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned + Send,
    {
        self.post(method, body)
            .await?
            .json::<R>()
            .await
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Classify a non-success HTTP status.
pub(crate) fn status_error(status: StatusCode, detail: String) -> StorageError {
    let detail = if detail.trim().is_empty() {
        status.to_string()
    } else {
        detail
    };
    match status {
        StatusCode::NOT_FOUND => StorageError::NotFound,
        StatusCode::CONFLICT => StorageError::Conflict,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            StorageError::Validation(detail)
        }
        _ => StorageError::Connection(detail),
    }
}

#[async_trait]
impl AssessmentRepository for HttpRepository {
    async fn list_by_subject(&self, subject: &SubjectId) -> Result<Vec<Assessment>, StorageError> {
        let dtos: Vec<AssessmentDto> = self
            .call("fetchAssessmentsBySubject", &BySubject { subject_id: subject })
            .await?;
        dtos.into_iter().map(Assessment::try_from).collect()
    }

    async fn get_assessment(&self, id: &AssessmentId) -> Result<Option<Assessment>, StorageError> {
        let found: Result<Option<AssessmentDto>, StorageError> = self
            .call("fetchAssessmentDetails", &ById { assessment_id: id })
            .await;
        match found {
            Ok(Some(dto)) => Assessment::try_from(dto).map(Some),
            Ok(None) | Err(StorageError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn upsert_assessment(&self, assessment: &Assessment) -> Result<(), StorageError> {
        self.post("upsertAssessment", &AssessmentDto::from(assessment))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionRepository for HttpRepository {
    async fn submit_answers(
        &self,
        taker: &UserId,
        request: &SubmissionRequest,
        submitted_at: DateTime<Utc>,
    ) -> Result<Submission, StorageError> {
        let body = SubmitAnswers {
            taker,
            assessment_id: &request.assessment_id,
            answers: &request.answers,
            idempotency_key: request.idempotency_key,
            submitted_at,
        };
        let dto: SubmissionDto = self.call("submitAnswers", &body).await?;
        Submission::try_from(dto)
    }

    async fn list_for_taker(&self, taker: &UserId) -> Result<Vec<Submission>, StorageError> {
        let dtos: Vec<SubmissionDto> = self.call("fetchMyResults", &ByTaker { taker }).await?;
        dtos.into_iter().map(Submission::try_from).collect()
    }

    async fn list_for_assessment(
        &self,
        id: &AssessmentId,
    ) -> Result<Vec<Submission>, StorageError> {
        let dtos: Vec<SubmissionDto> = self
            .call("fetchSubmissions", &ById { assessment_id: id })
            .await?;
        dtos.into_iter().map(Submission::try_from).collect()
    }

    async fn record_score(
        &self,
        id: &AssessmentId,
        taker: &UserId,
        score: u32,
    ) -> Result<Submission, StorageError> {
        let body = RecordScore {
            assessment_id: id,
            taker,
            score,
        };
        let dto: SubmissionDto = self.call("recordScore", &body).await?;
        Submission::try_from(dto)
    }
}

impl Storage {
    /// Build a `Storage` backed by the remote backend.
    ///
    /// # Errors
    ///
    /// Returns `HttpConfigError` if the HTTP client cannot be built.
    pub fn http(config: HttpConfig) -> Result<Self, HttpConfigError> {
        let repo = HttpRepository::new(config)?;
        let assessments: Arc<dyn AssessmentRepository> = Arc::new(repo.clone());
        let submissions: Arc<dyn SubmissionRepository> = Arc::new(repo);
        Ok(Self {
            assessments,
            submissions,
        })
    }
}
