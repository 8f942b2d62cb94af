//! Content hashing and content-addressed storage paths

use sha2::{Digest, Sha256};

use crate::models::{Term, Week};

/// Lowercase hex SHA-256 of `bytes` (64 characters)
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// `lesson-notes/{session}/{term}/week-{week}/{teacher}/{hash}.{ext}`
///
/// Pure: identical inputs always give the identical path.
pub fn build_storage_path(session_id: i64, term: Term, week: Week, teacher_id: i64, hash: &str, ext: &str) -> String {
    format!(
        "lesson-notes/{}/{}/week-{}/{}/{}.{}",
        session_id, term, week, teacher_id, hash, ext
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_64_hex() {
        let a = sha256_hex(b"lesson plan");
        let b = sha256_hex(b"lesson plan");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, sha256_hex(b"lesson plan v2"));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_storage_path_is_deterministic() {
        let week = Week::new(3).unwrap();
        let hash = sha256_hex(b"x");
        let a = build_storage_path(2024, Term::Second, week, 7, &hash, "pdf");
        let b = build_storage_path(2024, Term::Second, week, 7, &hash, "pdf");
        assert_eq!(a, b);
        assert_eq!(a, format!("lesson-notes/2024/2/week-3/7/{}.pdf", hash));
    }
}
