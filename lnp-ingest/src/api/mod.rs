//! HTTP API handlers for lnp-ingest

pub mod actor;
pub mod assignments;
pub mod audit;
pub mod files;
pub mod health;
pub mod jobs;
pub mod notes;
pub mod rate_limit;
pub mod signed_urls;
pub mod upload_body;
pub mod windows;

pub use actor::CurrentActor;
pub use assignments::assignment_routes;
pub use audit::audit_routes;
pub use files::file_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use notes::note_routes;
pub use signed_urls::signed_url_routes;
pub use windows::window_routes;

use crate::models::{AcademicContext, Term, Week};
use crate::ApiError;

/// Validate raw (session, term) query values
pub(crate) fn academic_context(session_id: i64, term: i64) -> Result<AcademicContext, ApiError> {
    let term = Term::try_from(term).map_err(ApiError::BadRequest)?;
    Ok(AcademicContext::new(session_id, term))
}

pub(crate) fn week(value: i64) -> Result<Week, ApiError> {
    Week::new(value).map_err(ApiError::BadRequest)
}
