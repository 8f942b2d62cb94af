//! Configuration resolution for lnp-ingest
//!
//! `[ingest]` section of the shared TOML file, every field defaulted, then
//! overridden from the environment. Priority for overridable values:
//! ENV → TOML → default.

use lnp_common::config::TomlConfig;
use lnp_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const SIGNING_SECRET_ENV: &str = "LNP_SIGNING_SECRET";
pub const SCANNER_URL_ENV: &str = "LNP_SCANNER_URL";
pub const PORT_ENV: &str = "LNP_PORT";

/// Which virus scanner backs stage 6 of the upload pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ScannerConfig {
    /// In-process signature scanner (EICAR test signature)
    #[default]
    Eicar,
    /// External scanning service reached over HTTP
    Http { url: String },
}

/// Per-actor quotas for the fixed-window rate limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub uploads_per_hour: u32,
    pub reviews_per_hour: u32,
    pub api_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            uploads_per_hour: 10,
            reviews_per_hour: 100,
            api_per_minute: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub bind_address: String,
    pub port: u16,
    pub max_upload_bytes: u64,
    pub signing_secret: String,
    /// Prefix for issued capability URLs
    pub public_base_url: String,
    pub upload_url_ttl_secs: u64,
    pub download_url_ttl_secs: u64,
    pub scanner: ScannerConfig,
    pub scanner_timeout_ms: u64,
    /// Outbound scanner requests per second
    pub scanner_rate_per_sec: u32,
    pub storage_timeout_ms: u64,
    /// Overrides `<root>/storage-fallback` when set
    pub fallback_storage_path: Option<PathBuf>,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
    pub job_poll_interval_ms: u64,
    pub rate_limits: RateLimitConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 5790,
            max_upload_bytes: 10 * 1024 * 1024,
            signing_secret: String::new(),
            public_base_url: "http://127.0.0.1:5790".to_string(),
            upload_url_ttl_secs: 15 * 60,
            download_url_ttl_secs: 60 * 60,
            scanner: ScannerConfig::Eicar,
            scanner_timeout_ms: 10_000,
            scanner_rate_per_sec: 5,
            storage_timeout_ms: 15_000,
            fallback_storage_path: None,
            cache_ttl_secs: 300,
            cache_capacity: 10_000,
            job_poll_interval_ms: 1_000,
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Build from the `[ingest]` table, apply env overrides, validate
    pub fn resolve(toml_config: Option<&TomlConfig>) -> Result<Self> {
        let mut config = match toml_config.and_then(|c| c.ingest.clone()) {
            Some(table) => IngestConfig::deserialize(toml::Value::Table(table))
                .map_err(|e| Error::Config(format!("Invalid [ingest] section: {}", e)))?,
            None => IngestConfig::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(secret) = non_empty_env(SIGNING_SECRET_ENV) {
            if !self.signing_secret.is_empty() {
                warn!("Signing secret found in environment and TOML. Using environment.");
            }
            info!("Signing secret loaded from environment variable");
            self.signing_secret = secret;
        }

        if let Some(url) = non_empty_env(SCANNER_URL_ENV) {
            info!(url = %url, "Virus scanner URL loaded from environment variable");
            self.scanner = ScannerConfig::Http { url };
        }

        if let Some(port) = non_empty_env(PORT_ENV) {
            self.port = port
                .parse()
                .map_err(|_| Error::Config(format!("{} is not a valid port: {}", PORT_ENV, port)))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.signing_secret.trim().is_empty() {
            return Err(Error::Config(format!(
                "Signing secret not configured. Set {} or `signing_secret` under [ingest]",
                SIGNING_SECRET_ENV
            )));
        }
        if self.max_upload_bytes == 0 {
            return Err(Error::Config("max_upload_bytes must be positive".to_string()));
        }
        if let ScannerConfig::Http { url } = &self.scanner {
            if url.trim().is_empty() {
                return Err(Error::Config("scanner url must not be empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn scanner_timeout(&self) -> Duration {
        Duration::from_millis(self.scanner_timeout_ms)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var(SIGNING_SECRET_ENV);
        std::env::remove_var(SCANNER_URL_ENV);
        std::env::remove_var(PORT_ENV);
    }

    #[test]
    #[serial]
    fn test_missing_secret_is_config_error() {
        clear_env();
        let err = IngestConfig::resolve(None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    #[serial]
    fn test_toml_section_with_defaults() {
        clear_env();
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [ingest]
            signing_secret = "from-toml"
            port = 6000

            [ingest.rate_limits]
            uploads_per_hour = 3
            "#,
        )
        .unwrap();

        let config = IngestConfig::resolve(Some(&toml_config)).unwrap();
        assert_eq!(config.signing_secret, "from-toml");
        assert_eq!(config.port, 6000);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.rate_limits.uploads_per_hour, 3);
        assert_eq!(config.rate_limits.reviews_per_hour, 100);
        assert_eq!(config.scanner, ScannerConfig::Eicar);
    }

    #[test]
    #[serial]
    fn test_env_overrides_toml() {
        clear_env();
        std::env::set_var(SIGNING_SECRET_ENV, "from-env");
        std::env::set_var(SCANNER_URL_ENV, "http://scanner.local/scan");
        let toml_config: TomlConfig =
            toml::from_str("[ingest]\nsigning_secret = \"from-toml\"\n").unwrap();

        let config = IngestConfig::resolve(Some(&toml_config)).unwrap();
        clear_env();

        assert_eq!(config.signing_secret, "from-env");
        assert_eq!(
            config.scanner,
            ScannerConfig::Http {
                url: "http://scanner.local/scan".into()
            }
        );
    }

    #[test]
    #[serial]
    fn test_invalid_port_env() {
        clear_env();
        std::env::set_var(SIGNING_SECRET_ENV, "s");
        std::env::set_var(PORT_ENV, "not-a-port");
        let result = IngestConfig::resolve(None);
        clear_env();
        assert!(result.is_err());
    }
}
