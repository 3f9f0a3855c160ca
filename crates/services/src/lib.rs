#![forbid(unsafe_code)]

pub mod app_services;
pub mod attempts;
pub mod authoring_service;
pub mod cache;
pub mod catalog_service;
pub mod error;

pub use assess_core::Clock;

pub use app_services::AppServices;
pub use attempts::{
    AttemptService, AttemptView, SessionEvent, SessionReport, TakerCommand, format_countdown,
    run_session,
};
pub use authoring_service::AuthoringService;
pub use cache::{Mutation, QueryCache, QueryKey};
pub use catalog_service::{AssessmentListItem, Availability, CatalogService, ResultItem};
pub use error::{AppServicesError, AttemptError, AuthoringError, CatalogError};
