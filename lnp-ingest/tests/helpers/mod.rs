//! Shared fixtures for lnp-ingest integration tests
//!
//! Each test gets its own temp-dir database and storage roots, wired with
//! the same services as the binary.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lnp_common::db::init_database;
use lnp_common::events::{EventBus, LnpEvent};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use zip::write::SimpleFileOptions;

use lnp_ingest::config::IngestConfig;
use lnp_ingest::db::windows::WindowSchedule;
use lnp_ingest::models::{AcademicContext, Actor, SubmissionWindow, Term, Week};
use lnp_ingest::services::cache::CacheError;
use lnp_ingest::services::scanner::ScanError;
use lnp_ingest::services::{
    CacheStore, EicarScanner, FileStorage, LocalStorage, MokaCacheStore, ScanVerdict, StorageError,
    UploadRequest, UploadTarget, VirusScanner,
};
use lnp_ingest::{AppState, Backends};

pub const SESSION: i64 = 2024;
pub const MATHEMATICS: i64 = 11;
pub const ENGLISH: i64 = 12;
pub const CLASS_A: i64 = 101;
pub const CLASS_B: i64 = 102;
pub const TEACHER: i64 = 7;
pub const ADMIN: i64 = 1;
pub const SIGNING_SECRET: &str = "integration-test-secret";

pub const EICAR: &[u8] = b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

pub struct TestEnv {
    pub dir: TempDir,
    pub state: AppState,
    /// Keeps a consumer on the bus so notification jobs can deliver
    pub events: broadcast::Receiver<LnpEvent>,
}

pub struct EnvOptions {
    pub scanner: Arc<dyn VirusScanner>,
    /// Replaces the primary storage when set
    pub storage: Option<Arc<dyn FileStorage>>,
    /// Replaces the moka backend when set
    pub cache: Option<Arc<dyn CacheStore>>,
    pub config: IngestConfig,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            scanner: Arc::new(EicarScanner),
            storage: None,
            cache: None,
            config: test_config(),
        }
    }
}

pub fn test_config() -> IngestConfig {
    IngestConfig {
        signing_secret: SIGNING_SECRET.to_string(),
        public_base_url: "http://files.test".to_string(),
        ..IngestConfig::default()
    }
}

pub async fn test_env() -> TestEnv {
    test_env_with(EnvOptions::default()).await
}

pub async fn test_env_with(options: EnvOptions) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("lnp.db")).await.unwrap();
    let event_bus = EventBus::new(256);
    let events = event_bus.subscribe();

    let storage = options
        .storage
        .unwrap_or_else(|| Arc::new(LocalStorage::new("primary", dir.path().join("storage"))));
    let mirror: Arc<dyn FileStorage> = Arc::new(LocalStorage::new("mirror", dir.path().join("mirror")));

    let state = AppState::wire(
        pool,
        event_bus,
        options.config,
        Backends {
            storage,
            mirror,
            scanner: options.scanner,
            cache: options
                .cache
                .unwrap_or_else(|| Arc::new(MokaCacheStore::new(1000, Duration::from_secs(300)))),
        },
    )
    .await
    .unwrap();

    TestEnv { dir, state, events }
}

/// 2024-09-`day` at `hour`:00 UTC
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, day, hour, 0, 0).unwrap()
}

pub fn ctx() -> AcademicContext {
    AcademicContext::new(SESSION, Term::First)
}

pub fn week(n: i64) -> Week {
    Week::new(n).unwrap()
}

pub fn admin() -> Actor {
    Actor::admin(ADMIN)
}

pub fn teacher() -> Actor {
    Actor::teacher(TEACHER)
}

/// Define and open the window for `week`, 2024-09-16 through 2024-09-22
pub async fn open_week(env: &TestEnv, n: i64) -> SubmissionWindow {
    define_window(env, n, at(16, 0), at(22, 23), true).await
}

pub async fn define_window(
    env: &TestEnv,
    n: i64,
    opens_at: DateTime<Utc>,
    closes_at: DateTime<Utc>,
    is_open: bool,
) -> SubmissionWindow {
    let schedule = WindowSchedule {
        session_id: SESSION,
        term: Term::First,
        week: week(n),
        opens_at,
        closes_at,
        is_open: Some(is_open),
    };
    env.state
        .windows
        .upsert_window(&schedule, &admin(), at(1, 0))
        .await
        .unwrap()
}

pub async fn grant_subject(env: &TestEnv, teacher_id: i64, subject_id: i64, classroom_id: i64) {
    env.state
        .authority
        .assign_subject_teacher(&admin(), teacher_id, subject_id, classroom_id, ctx())
        .await
        .unwrap();
}

pub async fn grant_class(env: &TestEnv, teacher_id: i64, classroom_id: i64) {
    env.state
        .authority
        .assign_class_teacher(&admin(), teacher_id, classroom_id, SESSION)
        .await
        .unwrap();
}

pub fn target(subject_id: i64, classroom_id: i64, n: i64) -> UploadTarget {
    UploadTarget {
        subject_id,
        classroom_id,
        context: ctx(),
        week: week(n),
    }
}

pub fn upload(actor: Actor, target: UploadTarget, file_name: &str, bytes: Vec<u8>) -> UploadRequest {
    UploadRequest {
        actor,
        target,
        file_name: file_name.to_string(),
        bytes,
    }
}

/// Minimal PDF with `pages` page objects, padded to at least `size` bytes
pub fn pdf_bytes(pages: usize, size: usize) -> Vec<u8> {
    let mut out = b"%PDF-1.4\n1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n".to_vec();
    out.extend_from_slice(format!("2 0 obj << /Type /Pages /Count {} >> endobj\n", pages).as_bytes());
    for i in 0..pages {
        out.extend_from_slice(format!("{} 0 obj << /Type /Page /Parent 2 0 R >> endobj\n", i + 3).as_bytes());
    }
    out.extend_from_slice(b"9 0 obj << /Author (Ada Obi) /ModDate (D:20240916083000Z) >> endobj\n");
    let tail = b"\n%%EOF\n";
    if out.len() + tail.len() < size {
        out.resize(size - tail.len(), b' ');
    }
    out.extend_from_slice(tail);
    out
}

pub fn docx_bytes() -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default();
        zip.start_file("[Content_Types].xml", options).unwrap();
        zip.write_all(b"<Types/>").unwrap();
        zip.start_file("word/document.xml", options).unwrap();
        zip.write_all(b"<w:document><w:body>Objectives</w:body></w:document>").unwrap();
        zip.start_file("docProps/app.xml", options).unwrap();
        zip.write_all(b"<Properties><Pages>2</Pages></Properties>").unwrap();
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

/// Windows executable header behind a `.pdf` name
pub fn exe_bytes() -> Vec<u8> {
    let mut bytes = b"MZ\x90\x00\x03\x00\x00\x00".to_vec();
    bytes.resize(2048, 0);
    bytes
}

pub fn infected_pdf() -> Vec<u8> {
    let mut bytes = pdf_bytes(1, 0);
    bytes.extend_from_slice(EICAR);
    bytes
}

/// Scanner whose backend is down
pub struct UnreachableScanner;

#[async_trait]
impl VirusScanner for UnreachableScanner {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn scan(&self, _bytes: &[u8]) -> Result<ScanVerdict, ScanError> {
        Err(ScanError::NetworkError("connection refused".to_string()))
    }
}

/// Storage that refuses every write
pub struct ReadOnlyStorage;

#[async_trait]
impl FileStorage for ReadOnlyStorage {
    fn name(&self) -> &str {
        "read-only"
    }

    async fn put(&self, _path: &str, _bytes: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("primary and fallback refused the write".to_string()))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        Err(StorageError::NotFound(path.to_string()))
    }

    async fn exists(&self, _path: &str) -> Result<bool, StorageError> {
        Ok(false)
    }

    async fn delete(&self, _path: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Local storage that refuses document writes but accepts thumbnails
pub struct DocumentRefusingStorage(pub LocalStorage);

#[async_trait]
impl FileStorage for DocumentRefusingStorage {
    fn name(&self) -> &str {
        "document-refusing"
    }

    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if path.ends_with(".thumb.svg") {
            self.0.put(path, bytes).await
        } else {
            Err(StorageError::Unavailable("primary and fallback refused the write".to_string()))
        }
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.0.get(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        self.0.exists(path).await
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.0.delete(path).await
    }
}

/// Cache backend that is always down
pub struct UnavailableCache;

#[async_trait]
impl CacheStore for UnavailableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: String) -> Result<(), CacheError> {
        Err(CacheError("connection refused".to_string()))
    }

    async fn invalidate(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError("connection refused".to_string()))
    }
}

/// Number of rows in `table`
pub async fn count_rows(env: &TestEnv, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(&env.state.db)
        .await
        .unwrap()
}
