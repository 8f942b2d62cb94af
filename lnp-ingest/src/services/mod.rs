//! Services layer for the lesson-note pipeline
//!
//! Each service owns one concern and talks to the database through `crate::db`.

pub mod audit_logger;
pub mod authority;
pub mod cache;
pub mod content_type;
pub mod hashing;
pub mod job_handlers;
pub mod job_queue;
pub mod metadata_extractor;
pub mod rate_limiter;
pub mod review;
pub mod scanner;
pub mod signed_url;
pub mod storage;
pub mod thumbnail;
pub mod upload_pipeline;
pub mod window_gate;

pub use audit_logger::AuditLogger;
pub use authority::AssignmentAuthority;
pub use cache::{CacheLayer, CacheStore, MokaCacheStore};
pub use job_handlers::PipelineJobHandler;
pub use job_queue::{JobError, JobHandler, RetryableJobQueue, RunSummary};
pub use rate_limiter::{RateAction, RateDecision, RateLimiter};
pub use review::{BulkApproveReport, ReviewOutcome, ReviewStateMachine};
pub use scanner::{EicarScanner, HttpScanner, ScanVerdict, VirusScanner};
pub use signed_url::{SignedCapability, SignedUrl, SignedUrlIssuer, UrlAction};
pub use storage::{FallbackStorage, FileStorage, LocalStorage, StorageError};
pub use upload_pipeline::{PipelineLimits, UploadOutcome, UploadPipeline, UploadRequest, UploadTarget};
pub use window_gate::SubmissionWindowGate;
