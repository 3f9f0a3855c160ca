//! Taking an assessment: starting sessions, driving them, and showing them.

mod driver;
mod service;
mod ticker;
mod view;

pub use driver::{SessionEvent, SessionReport, TICK_PERIOD, TakerCommand, run_session};
pub use service::AttemptService;
pub use ticker::SessionTicker;
pub use view::{AttemptView, format_countdown};
