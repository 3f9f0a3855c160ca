//! Read-side cache for repository queries and the table of which mutations make
//! which cached reads stale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use assess_core::model::{Assessment, AssessmentId, SubjectId, Submission, UserId};

/// One cacheable repository read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    AssessmentsBySubject(SubjectId),
    AssessmentDetails(AssessmentId),
    MyResults(UserId),
    SubmissionsFor(AssessmentId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryFamily {
    AssessmentsBySubject,
    AssessmentDetails,
    MyResults,
    SubmissionsFor,
}

impl QueryKey {
    #[must_use]
    pub fn family(&self) -> QueryFamily {
        match self {
            QueryKey::AssessmentsBySubject(_) => QueryFamily::AssessmentsBySubject,
            QueryKey::AssessmentDetails(_) => QueryFamily::AssessmentDetails,
            QueryKey::MyResults(_) => QueryFamily::MyResults,
            QueryKey::SubmissionsFor(_) => QueryFamily::SubmissionsFor,
        }
    }
}

/// A successful write against the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SubmitAnswers {
        assessment_id: AssessmentId,
        taker: UserId,
    },
    CreateAssessment {
        assessment_id: AssessmentId,
        subject_id: SubjectId,
    },
    RecordScore {
        assessment_id: AssessmentId,
        taker: UserId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Key(QueryKey),
    Family(QueryFamily),
}

impl Invalidation {
    #[must_use]
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            Invalidation::Key(target) => target == key,
            Invalidation::Family(family) => key.family() == *family,
        }
    }
}

/// Reads made stale by `mutation`.
///
/// A submission changes the taker's results, the grading view, and the
/// completed/available status shown in subject listings. The subject is not part
/// of the mutation, so every listing is dropped.
#[must_use]
pub fn invalidations(mutation: &Mutation) -> Vec<Invalidation> {
    match mutation {
        Mutation::SubmitAnswers {
            assessment_id,
            taker,
        } => vec![
            Invalidation::Key(QueryKey::MyResults(taker.clone())),
            Invalidation::Key(QueryKey::SubmissionsFor(assessment_id.clone())),
            Invalidation::Family(QueryFamily::AssessmentsBySubject),
        ],
        Mutation::CreateAssessment {
            assessment_id,
            subject_id,
        } => vec![
            Invalidation::Key(QueryKey::AssessmentsBySubject(subject_id.clone())),
            Invalidation::Key(QueryKey::AssessmentDetails(assessment_id.clone())),
        ],
        Mutation::RecordScore {
            assessment_id,
            taker,
        } => vec![
            Invalidation::Key(QueryKey::MyResults(taker.clone())),
            Invalidation::Key(QueryKey::SubmissionsFor(assessment_id.clone())),
        ],
    }
}

#[derive(Debug, Clone)]
pub enum Cached {
    Assessments(Arc<Vec<Assessment>>),
    Assessment(Arc<Assessment>),
    Submissions(Arc<Vec<Submission>>),
}

/// Process-wide cache shared by the services.
///
/// Every [`QueryCache::apply`] bumps a generation counter. Readers note the
/// generation before going to the repository and hand it back to
/// [`QueryCache::insert`], which refuses results fetched across a mutation.
#[derive(Debug, Default)]
pub struct QueryCache {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<QueryKey, Cached>,
    generation: u64,
}

impl QueryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Entries are plain values; a panic mid-insert cannot leave one half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, key: &QueryKey) -> Option<Cached> {
        self.inner().entries.get(key).cloned()
    }

    /// Current generation; read it before fetching a value to cache.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner().generation
    }

    /// Store `value` unless a mutation was applied since `fetched_at`.
    /// Returns whether the value was kept.
    pub fn insert(&self, key: QueryKey, value: Cached, fetched_at: u64) -> bool {
        let mut inner = self.inner();
        if inner.generation != fetched_at {
            tracing::debug!(?key, "discarded read that raced a mutation");
            return false;
        }
        inner.entries.insert(key, value);
        true
    }

    #[must_use]
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner().entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner().entries.is_empty()
    }

    /// Drop every entry the mutation makes stale. Returns how many were dropped.
    pub fn apply(&self, mutation: &Mutation) -> usize {
        let rules = invalidations(mutation);
        let mut inner = self.inner();
        inner.generation += 1;
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !rules.iter().any(|rule| rule.matches(key)));
        let dropped = before - inner.entries.len();
        tracing::debug!(?mutation, dropped, "invalidated cached queries");
        dropped
    }

    pub fn assessments(&self, key: &QueryKey) -> Option<Arc<Vec<Assessment>>> {
        match self.get(key)? {
            Cached::Assessments(list) => Some(list),
            _ => None,
        }
    }

    pub fn assessment(&self, key: &QueryKey) -> Option<Arc<Assessment>> {
        match self.get(key)? {
            Cached::Assessment(one) => Some(one),
            _ => None,
        }
    }

    pub fn submissions(&self, key: &QueryKey) -> Option<Arc<Vec<Submission>>> {
        match self.get(key)? {
            Cached::Submissions(list) => Some(list),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled() -> QueryCache {
        let cache = QueryCache::new();
        let generation = cache.generation();
        for subject in ["math", "art"] {
            cache.insert(
                QueryKey::AssessmentsBySubject(SubjectId::new(subject)),
                Cached::Assessments(Arc::new(Vec::new())),
                generation,
            );
        }
        for taker in ["ana", "ben"] {
            cache.insert(
                QueryKey::MyResults(UserId::new(taker)),
                Cached::Submissions(Arc::new(Vec::new())),
                generation,
            );
        }
        cache.insert(
            QueryKey::SubmissionsFor(AssessmentId::new("quiz-1")),
            Cached::Submissions(Arc::new(Vec::new())),
            generation,
        );
        cache
    }

    #[test]
    fn submit_drops_results_grading_and_listings() {
        let cache = filled();
        let dropped = cache.apply(&Mutation::SubmitAnswers {
            assessment_id: AssessmentId::new("quiz-1"),
            taker: UserId::new("ana"),
        });
        assert_eq!(dropped, 4);
        assert!(cache.contains(&QueryKey::MyResults(UserId::new("ben"))));
        assert!(!cache.contains(&QueryKey::MyResults(UserId::new("ana"))));
        assert!(!cache.contains(&QueryKey::AssessmentsBySubject(SubjectId::new("art"))));
    }

    #[test]
    fn create_only_touches_its_subject() {
        let cache = filled();
        cache.apply(&Mutation::CreateAssessment {
            assessment_id: AssessmentId::new("quiz-2"),
            subject_id: SubjectId::new("math"),
        });
        assert!(!cache.contains(&QueryKey::AssessmentsBySubject(SubjectId::new("math"))));
        assert!(cache.contains(&QueryKey::AssessmentsBySubject(SubjectId::new("art"))));
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn grading_keeps_listings() {
        let cache = filled();
        let dropped = cache.apply(&Mutation::RecordScore {
            assessment_id: AssessmentId::new("quiz-1"),
            taker: UserId::new("ben"),
        });
        assert_eq!(dropped, 2);
        assert!(cache.contains(&QueryKey::AssessmentsBySubject(SubjectId::new("math"))));
    }

    #[test]
    fn typed_accessors_check_variant() {
        let cache = filled();
        let key = QueryKey::MyResults(UserId::new("ana"));
        assert!(cache.submissions(&key).is_some());
        assert!(cache.assessments(&key).is_none());
    }

    #[test]
    fn read_started_before_a_mutation_is_not_cached() {
        let cache = QueryCache::new();
        let key = QueryKey::MyResults(UserId::new("ana"));
        let fetched_at = cache.generation();

        // A write lands while the read is still in flight.
        cache.apply(&Mutation::SubmitAnswers {
            assessment_id: AssessmentId::new("quiz-1"),
            taker: UserId::new("ana"),
        });

        let stale = Cached::Submissions(Arc::new(Vec::new()));
        assert!(!cache.insert(key.clone(), stale, fetched_at));
        assert!(!cache.contains(&key));

        let fresh = Cached::Submissions(Arc::new(Vec::new()));
        assert!(cache.insert(key.clone(), fresh, cache.generation()));
        assert!(cache.contains(&key));
    }
}
