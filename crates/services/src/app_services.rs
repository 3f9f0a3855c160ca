use std::sync::Arc;

use assess_core::Clock;
use storage::http::HttpConfig;
use storage::repository::Storage;

use crate::attempts::AttemptService;
use crate::authoring_service::AuthoringService;
use crate::cache::QueryCache;
use crate::catalog_service::CatalogService;
use crate::error::AppServicesError;

/// Assembles app-facing services over one storage backend and one cache.
#[derive(Clone)]
pub struct AppServices {
    cache: Arc<QueryCache>,
    catalog: Arc<CatalogService>,
    attempts: Arc<AttemptService>,
    authoring: Arc<AuthoringService>,
}

impl AppServices {
    #[must_use]
    pub fn new(storage: &Storage, clock: Clock) -> Self {
        let cache = Arc::new(QueryCache::new());
        let catalog = Arc::new(CatalogService::new(
            clock,
            Arc::clone(&storage.assessments),
            Arc::clone(&storage.submissions),
            Arc::clone(&cache),
        ));
        let attempts = Arc::new(AttemptService::new(
            clock,
            Arc::clone(&storage.assessments),
            Arc::clone(&storage.submissions),
            Arc::clone(&cache),
        ));
        let authoring = Arc::new(AuthoringService::new(
            clock,
            Arc::clone(&storage.assessments),
            Arc::clone(&storage.submissions),
            Arc::clone(&cache),
        ));
        Self {
            cache,
            catalog,
            attempts,
            authoring,
        }
    }

    #[must_use]
    pub fn in_memory(clock: Clock) -> Self {
        Self::new(&Storage::in_memory(), clock)
    }

    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::new(&storage, clock))
    }

    /// Build services backed by the remote backend.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the HTTP client cannot be built.
    pub fn new_http(config: HttpConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::http(config)?;
        Ok(Self::new(&storage, clock))
    }

    #[must_use]
    pub fn cache(&self) -> Arc<QueryCache> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<CatalogService> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn attempts(&self) -> Arc<AttemptService> {
        Arc::clone(&self.attempts)
    }

    #[must_use]
    pub fn authoring(&self) -> Arc<AuthoringService> {
        Arc::clone(&self.authoring)
    }
}
