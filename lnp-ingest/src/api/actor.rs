//! Actor extraction
//!
//! Identity is established by the upstream auth layer, which forwards it as
//! `x-actor-id` and `x-actor-role` headers.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::models::{Actor, Role};
use crate::ApiError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// The authenticated caller
#[derive(Debug, Clone, Copy)]
pub struct CurrentActor(pub Actor);

/// Read the actor headers; `None` when absent or malformed
pub fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let id = headers.get(ACTOR_ID_HEADER)?.to_str().ok()?.trim().parse().ok()?;
    let role: Role = headers.get(ACTOR_ROLE_HEADER)?.to_str().ok()?.parse().ok()?;
    Some(Actor { id, role })
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers)
            .map(CurrentActor)
            .ok_or_else(|| ApiError::Forbidden("missing or invalid actor identity".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_reads_actor_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_ID_HEADER, HeaderValue::from_static("42"));
        headers.insert(ACTOR_ROLE_HEADER, HeaderValue::from_static("Admin"));
        assert_eq!(actor_from_headers(&headers), Some(Actor::admin(42)));
    }

    #[test]
    fn test_rejects_unknown_role() {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_ID_HEADER, HeaderValue::from_static("42"));
        headers.insert(ACTOR_ROLE_HEADER, HeaderValue::from_static("parent"));
        assert_eq!(actor_from_headers(&headers), None);

        headers.remove(ACTOR_ROLE_HEADER);
        assert_eq!(actor_from_headers(&headers), None);
    }
}
