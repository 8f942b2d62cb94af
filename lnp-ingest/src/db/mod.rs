//! Persistence for the lesson-note pipeline
//!
//! Free functions over a `SqlitePool` (or a connection inside a monitored
//! transaction). Schema lives in `lnp_common::db::init`.

pub mod assignments;
pub mod audit;
pub mod jobs;
pub mod notes;
pub mod rate_limits;
pub mod windows;

use lnp_common::{Error, Result};
use uuid::Uuid;

use crate::models::{Term, Week};

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Corrupt id '{}': {}", value, e)))
}

pub(crate) fn parse_term(value: i64) -> Result<Term> {
    Term::try_from(value).map_err(Error::Internal)
}

pub(crate) fn parse_week(value: i64) -> Result<Week> {
    Week::new(value).map_err(Error::Internal)
}
