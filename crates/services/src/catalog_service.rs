use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use assess_core::Clock;
use assess_core::model::{Assessment, AssessmentId, AssessmentKind, SubjectId, Submission, UserId};
use storage::repository::{AssessmentRepository, SubmissionRepository};

use crate::cache::{Cached, QueryCache, QueryKey};
use crate::error::CatalogError;

/// Whether a taker may start an assessment right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Availability {
    Available,
    NotYetOpen {
        opens_at: DateTime<Utc>,
    },
    Completed {
        submitted_at: DateTime<Utc>,
        score: Option<u32>,
        percentage: Option<u32>,
    },
}

/// One row of a subject's assessment listing, as seen by a taker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssessmentListItem {
    pub id: AssessmentId,
    pub kind: AssessmentKind,
    pub title: String,
    pub question_count: usize,
    pub duration_minutes: u32,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub availability: Availability,
}

/// One of the taker's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultItem {
    pub assessment_id: AssessmentId,
    /// `None` when the assessment no longer exists.
    pub title: Option<String>,
    pub kind: Option<AssessmentKind>,
    pub submitted_at: DateTime<Utc>,
    pub score: Option<u32>,
    pub total: usize,
    pub percentage: Option<u32>,
}

impl ResultItem {
    #[must_use]
    pub fn is_graded(&self) -> bool {
        self.score.is_some()
    }
}

/// Taker-facing reads: listings, details, and results.
#[derive(Clone)]
pub struct CatalogService {
    clock: Clock,
    assessments: Arc<dyn AssessmentRepository>,
    submissions: Arc<dyn SubmissionRepository>,
    cache: Arc<QueryCache>,
}

impl CatalogService {
    #[must_use]
    pub fn new(
        clock: Clock,
        assessments: Arc<dyn AssessmentRepository>,
        submissions: Arc<dyn SubmissionRepository>,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            clock,
            assessments,
            submissions,
            cache,
        }
    }

    /// Assessments of `subject` with their status for `taker`.
    ///
    /// Completed assessments are locked; scheduled ones report when they open.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Storage` if either listing cannot be fetched.
    pub async fn assessments_for(
        &self,
        subject: &SubjectId,
        taker: &UserId,
    ) -> Result<Vec<AssessmentListItem>, CatalogError> {
        let assessments = self.subject_assessments(subject).await?;
        let results = self.taker_submissions(taker).await?;
        let completed: HashMap<&AssessmentId, &Submission> =
            results.iter().map(|s| (s.assessment_id(), s)).collect();
        let now = self.clock.now();

        Ok(assessments
            .iter()
            .map(|assessment| {
                let availability = match completed.get(assessment.id()) {
                    Some(submission) => Availability::Completed {
                        submitted_at: submission.submitted_at(),
                        score: submission.score(),
                        percentage: submission.percentage(),
                    },
                    None => match assessment.scheduled_start() {
                        Some(opens_at) if !assessment.is_open_at(now) => {
                            Availability::NotYetOpen { opens_at }
                        }
                        _ => Availability::Available,
                    },
                };
                AssessmentListItem {
                    id: assessment.id().clone(),
                    kind: assessment.kind(),
                    title: assessment.title().to_string(),
                    question_count: assessment.question_count(),
                    duration_minutes: assessment.duration_minutes(),
                    scheduled_start: assessment.scheduled_start(),
                    availability,
                }
            })
            .collect())
    }

    /// Taker copy of one assessment, without correct answers.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NotFound` if the id is unknown.
    pub async fn details(&self, id: &AssessmentId) -> Result<Assessment, CatalogError> {
        Ok(self.full_assessment(id).await?.for_taker())
    }

    /// The taker's submissions with titles and percentages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Storage` if the results cannot be fetched.
    pub async fn my_results(&self, taker: &UserId) -> Result<Vec<ResultItem>, CatalogError> {
        let submissions = self.taker_submissions(taker).await?;
        let mut items = Vec::with_capacity(submissions.len());
        for submission in submissions.iter() {
            let assessment = match self.full_assessment(submission.assessment_id()).await {
                Ok(assessment) => Some(assessment),
                Err(CatalogError::NotFound(id)) => {
                    tracing::warn!(assessment_id = %id, "result refers to a missing assessment");
                    None
                }
                Err(e) => return Err(e),
            };
            items.push(ResultItem {
                assessment_id: submission.assessment_id().clone(),
                title: assessment.as_ref().map(|a| a.title().to_string()),
                kind: assessment.as_ref().map(|a| a.kind()),
                submitted_at: submission.submitted_at(),
                score: submission.score(),
                total: submission.answers().len(),
                percentage: submission.percentage(),
            });
        }
        Ok(items)
    }

    async fn subject_assessments(
        &self,
        subject: &SubjectId,
    ) -> Result<Arc<Vec<Assessment>>, CatalogError> {
        let key = QueryKey::AssessmentsBySubject(subject.clone());
        if let Some(hit) = self.cache.assessments(&key) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let fetched = Arc::new(self.assessments.list_by_subject(subject).await?);
        self.cache.insert(key, Cached::Assessments(Arc::clone(&fetched)), generation);
        Ok(fetched)
    }

    async fn taker_submissions(
        &self,
        taker: &UserId,
    ) -> Result<Arc<Vec<Submission>>, CatalogError> {
        let key = QueryKey::MyResults(taker.clone());
        if let Some(hit) = self.cache.submissions(&key) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let fetched = Arc::new(self.submissions.list_for_taker(taker).await?);
        self.cache.insert(key, Cached::Submissions(Arc::clone(&fetched)), generation);
        Ok(fetched)
    }

    async fn full_assessment(&self, id: &AssessmentId) -> Result<Arc<Assessment>, CatalogError> {
        let key = QueryKey::AssessmentDetails(id.clone());
        if let Some(hit) = self.cache.assessment(&key) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let fetched = Arc::new(
            self.assessments
                .get_assessment(id)
                .await?
                .ok_or_else(|| CatalogError::NotFound(id.clone()))?,
        );
        self.cache.insert(key, Cached::Assessment(Arc::clone(&fetched)), generation);
        Ok(fetched)
    }
}
