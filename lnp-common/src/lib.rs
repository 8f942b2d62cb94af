//! # LNP Common Library
//!
//! Shared code for the lesson-note pipeline crates:
//! - Error type and result alias
//! - Configuration loading and root folder resolution
//! - Database initialization (schema and storage-level constraints)
//! - Domain events (LnpEvent enum) and the EventBus
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
