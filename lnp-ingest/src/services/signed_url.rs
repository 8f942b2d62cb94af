//! HMAC-signed capability URLs
//!
//! URL shape:
//! `{base}/files/{upload|download}?path=<urlencoded>&expires=<unix>&signature=<hex>`
//! with `signature = hex(HMAC-SHA256("{path}|{expires}", secret))`.
//!
//! Possession of a valid, unexpired URL authorizes that one transfer with no
//! session identity.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::models::LessonNoteVersion;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded SHA-256 MAC length
const SIGNATURE_HEX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlAction {
    Upload,
    Download,
}

impl UrlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            UrlAction::Upload => "upload",
            UrlAction::Download => "download",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires: i64,
}

/// Verified contents of a capability URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCapability {
    pub action: UrlAction,
    pub path: String,
    pub expires: i64,
}

#[derive(Clone)]
pub struct SignedUrlIssuer {
    secret: Vec<u8>,
    base_url: String,
}

impl SignedUrlIssuer {
    pub fn new(secret: impl Into<Vec<u8>>, base_url: &str) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn mac(&self, path: &str, expires: i64) -> ApiResult<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|e| ApiError::Internal(format!("signing key rejected: {}", e)))?;
        mac.update(path.as_bytes());
        mac.update(b"|");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Hex MAC over `{path}|{expires}`
    pub fn sign(&self, path: &str, expires: i64) -> ApiResult<String> {
        Ok(hex::encode(self.mac(path, expires)?.finalize().into_bytes()))
    }

    fn issue(&self, action: UrlAction, path: &str, ttl: Duration, now: DateTime<Utc>) -> ApiResult<SignedUrl> {
        let expires = now.timestamp() + ttl.as_secs() as i64;
        let url = format!(
            "{}/files/{}?path={}&expires={}&signature={}",
            self.base_url,
            action.as_str(),
            urlencoding::encode(path),
            expires,
            self.sign(path, expires)?
        );
        Ok(SignedUrl { url, expires })
    }

    pub fn issue_upload_url(&self, path: &str, ttl: Duration, now: DateTime<Utc>) -> ApiResult<SignedUrl> {
        self.issue(UrlAction::Upload, path, ttl, now)
    }

    pub fn issue_download_url(&self, path: &str, ttl: Duration, now: DateTime<Utc>) -> ApiResult<SignedUrl> {
        self.issue(UrlAction::Download, path, ttl, now)
    }

    pub fn issue_download_url_for_version(
        &self,
        version: &LessonNoteVersion,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> ApiResult<SignedUrl> {
        self.issue_download_url(&version.file_path, ttl, now)
    }

    /// Parse and verify a full capability URL
    pub fn validate(&self, url: &str, now: DateTime<Utc>) -> ApiResult<SignedCapability> {
        let (location, query) = url
            .split_once('?')
            .ok_or_else(|| invalid("missing query string"))?;

        let action = if location.ends_with("/files/upload") {
            UrlAction::Upload
        } else if location.ends_with("/files/download") {
            UrlAction::Download
        } else {
            return Err(invalid("unknown capability route"));
        };

        let mut path = None;
        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(value)
                .map_err(|_| invalid("malformed query encoding"))?
                .into_owned();
            match key {
                "path" => path = Some(value),
                "expires" => expires = Some(value),
                "signature" => signature = Some(value),
                _ => {}
            }
        }

        let path = path.ok_or_else(|| invalid("missing path"))?;
        let expires = expires.ok_or_else(|| invalid("missing expires"))?;
        let signature = signature.ok_or_else(|| invalid("missing signature"))?;

        self.verify(action, &path, &expires, &signature, now)
    }

    /// Verify already-split capability parameters
    ///
    /// The MAC is checked before expiry, so a tampered `expires` reports
    /// `InvalidSignature` rather than `Expired`.
    pub fn verify(
        &self,
        action: UrlAction,
        path: &str,
        expires: &str,
        signature: &str,
        now: DateTime<Utc>,
    ) -> ApiResult<SignedCapability> {
        let expires: i64 = expires.parse().map_err(|_| invalid("malformed expires"))?;

        // Canonical lowercase hex only; an altered character never verifies
        if signature.len() != SIGNATURE_HEX_LEN
            || !signature.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(invalid("signature mismatch"));
        }
        let provided = hex::decode(signature).map_err(|_| invalid("signature mismatch"))?;

        self.mac(path, expires)?
            .verify_slice(&provided)
            .map_err(|_| invalid("signature mismatch"))?;

        if now.timestamp() > expires {
            return Err(ApiError::Expired("signed URL has expired".to_string()));
        }

        Ok(SignedCapability {
            action,
            path: path.to_string(),
            expires,
        })
    }
}

fn invalid(reason: &str) -> ApiError {
    ApiError::InvalidSignature(format!("invalid signed URL: {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PATH: &str = "lesson-notes/2024/1/week-1/7/abc.pdf";

    fn issuer() -> SignedUrlIssuer {
        SignedUrlIssuer::new("test-secret", "https://files.school.test/")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 16, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_issued_url_validates_before_expiry() {
        let issuer = issuer();
        let signed = issuer.issue_download_url(PATH, Duration::from_secs(600), t0()).unwrap();

        assert!(signed.url.starts_with("https://files.school.test/files/download?path="));
        let cap = issuer.validate(&signed.url, t0()).unwrap();
        assert_eq!(cap.action, UrlAction::Download);
        assert_eq!(cap.path, PATH);
        assert_eq!(cap.expires, t0().timestamp() + 600);

        // Boundary: still valid at the expiry second
        assert!(issuer
            .validate(&signed.url, t0() + chrono::Duration::seconds(600))
            .is_ok());
    }

    #[test]
    fn test_expired_url_is_rejected() {
        let issuer = issuer();
        let signed = issuer.issue_upload_url(PATH, Duration::from_secs(60), t0()).unwrap();
        let err = issuer
            .validate(&signed.url, t0() + chrono::Duration::seconds(61))
            .unwrap_err();
        assert!(matches!(err, ApiError::Expired(_)));
    }

    #[test]
    fn test_single_character_signature_change_is_rejected() {
        let issuer = issuer();
        let signed = issuer.issue_upload_url(PATH, Duration::from_secs(60), t0()).unwrap();
        let sig_start = signed.url.rfind("signature=").unwrap() + "signature=".len();

        for idx in [sig_start, sig_start + 31, signed.url.len() - 1] {
            let mut bytes = signed.url.clone().into_bytes();
            bytes[idx] = if bytes[idx] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(bytes).unwrap();
            let err = issuer.validate(&tampered, t0()).unwrap_err();
            assert!(matches!(err, ApiError::InvalidSignature(_)), "index {}", idx);
        }

        // Same bytes, different spelling
        let upper = format!(
            "{}{}",
            &signed.url[..sig_start],
            signed.url[sig_start..].to_ascii_uppercase()
        );
        assert!(issuer.validate(&upper, t0()).is_err());
    }

    #[test]
    fn test_tampered_expiry_or_path_is_invalid_signature() {
        let issuer = issuer();
        let signed = issuer.issue_download_url(PATH, Duration::from_secs(60), t0()).unwrap();

        let extended = signed
            .url
            .replace(&format!("expires={}", signed.expires), &format!("expires={}", signed.expires + 3600));
        assert!(matches!(
            issuer.validate(&extended, t0()).unwrap_err(),
            ApiError::InvalidSignature(_)
        ));

        let other_path = signed.url.replace("abc.pdf", "xyz.pdf");
        assert!(matches!(
            issuer.validate(&other_path, t0()).unwrap_err(),
            ApiError::InvalidSignature(_)
        ));
    }

    #[test]
    fn test_other_secret_cannot_forge() {
        let signed = issuer().issue_download_url(PATH, Duration::from_secs(60), t0()).unwrap();
        let other = SignedUrlIssuer::new("other-secret", "https://files.school.test");
        assert!(other.validate(&signed.url, t0()).is_err());
    }
}
