//! Virus scanning
//!
//! Two backends: an in-process signature scanner that recognizes the EICAR
//! test file, and a client for an external scanning service. Callers bound
//! every scan with a timeout; a scanner failure is never treated as clean.

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

/// EICAR anti-malware test signature
const EICAR_SIGNATURE: &[u8] =
    b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

const USER_AGENT: &str = concat!("lnp-ingest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Infected { signature: String },
}

impl ScanVerdict {
    /// Value stored in `scan_result`
    pub fn label(&self) -> String {
        match self {
            ScanVerdict::Clean => "clean".to_string(),
            ScanVerdict::Infected { signature } => format!("infected:{}", signature),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Scanner returned {0}: {1}")]
    ServiceError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Scan timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait VirusScanner: Send + Sync {
    fn name(&self) -> &str;
    async fn scan(&self, bytes: &[u8]) -> Result<ScanVerdict, ScanError>;
}

/// Signature scanner for the EICAR test string
#[derive(Debug, Default, Clone)]
pub struct EicarScanner;

#[async_trait]
impl VirusScanner for EicarScanner {
    fn name(&self) -> &str {
        "eicar"
    }

    async fn scan(&self, bytes: &[u8]) -> Result<ScanVerdict, ScanError> {
        let found = bytes
            .windows(EICAR_SIGNATURE.len())
            .any(|window| window == EICAR_SIGNATURE);
        if found {
            Ok(ScanVerdict::Infected {
                signature: "EICAR-Test-File".to_string(),
            })
        } else {
            Ok(ScanVerdict::Clean)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScanResponse {
    infected: bool,
    #[serde(default)]
    signature: Option<String>,
}

/// Client for an HTTP scanning service
///
/// `POST {url}` with the raw bytes; the service answers
/// `{"infected": bool, "signature": "..."}`.
pub struct HttpScanner {
    client: reqwest::Client,
    url: String,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpScanner {
    pub fn new(url: &str, timeout: Duration, requests_per_second: u32) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::NetworkError(e.to_string()))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            url: url.to_string(),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }
}

#[async_trait]
impl VirusScanner for HttpScanner {
    fn name(&self) -> &str {
        "http"
    }

    async fn scan(&self, bytes: &[u8]) -> Result<ScanVerdict, ScanError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(url = %self.url, size = bytes.len(), "Submitting file to scanner");

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| ScanError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::ServiceError(status.as_u16(), body));
        }

        let parsed: ScanResponse = response
            .json()
            .await
            .map_err(|e| ScanError::ParseError(e.to_string()))?;

        if parsed.infected {
            Ok(ScanVerdict::Infected {
                signature: parsed.signature.unwrap_or_else(|| "unknown".to_string()),
            })
        } else {
            Ok(ScanVerdict::Clean)
        }
    }
}

/// Run `scanner` bounded by `timeout`
pub async fn scan_with_timeout(
    scanner: &dyn VirusScanner,
    bytes: &[u8],
    timeout: Duration,
) -> Result<ScanVerdict, ScanError> {
    tokio::time::timeout(timeout, scanner.scan(bytes))
        .await
        .unwrap_or(Err(ScanError::Timeout(timeout)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_eicar_detected_anywhere_in_file() {
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.extend_from_slice(EICAR_SIGNATURE);
        bytes.extend_from_slice(b"\n%%EOF");

        let verdict = EicarScanner.scan(&bytes).await.unwrap();
        assert!(matches!(verdict, ScanVerdict::Infected { .. }));
        assert!(verdict.label().starts_with("infected:"));
    }

    #[tokio::test]
    async fn test_clean_file() {
        let verdict = EicarScanner.scan(b"%PDF-1.4 lesson plan").await.unwrap();
        assert_eq!(verdict, ScanVerdict::Clean);
        assert_eq!(verdict.label(), "clean");
    }

    struct HangingScanner;

    #[async_trait]
    impl VirusScanner for HangingScanner {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn scan(&self, _bytes: &[u8]) -> Result<ScanVerdict, ScanError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ScanVerdict::Clean)
        }
    }

    #[tokio::test]
    async fn test_timeout_is_an_error_not_clean() {
        let result = scan_with_timeout(&HangingScanner, b"x", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ScanError::Timeout(_))));
    }
}
