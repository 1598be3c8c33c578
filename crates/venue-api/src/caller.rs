//! Caller identity extractor.
//!
//! Authentication is done upstream; the gateway forwards the resolved
//! identity in two headers:
//!
//! | Header | Value |
//! |--------|-------|
//! | `x-subject-id` | The caller's subject UUID (required) |
//! | `x-subject-role` | `admin` for administrators; anything else or absent is a regular subject |

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, request::Parts},
};
use uuid::Uuid;
use venue_core::subject::Caller;

use crate::error::ApiError;

pub const SUBJECT_ID_HEADER: &str = "x-subject-id";
pub const SUBJECT_ROLE_HEADER: &str = "x-subject-role";

/// The authenticated caller of the current request.
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity(pub Caller);

/// Resolve the caller from request headers.
pub fn resolve_caller(headers: &HeaderMap) -> Result<Caller, ApiError> {
  let raw = headers
    .get(SUBJECT_ID_HEADER)
    .ok_or_else(|| ApiError::Unauthenticated(format!("missing {SUBJECT_ID_HEADER}")))?
    .to_str()
    .map_err(|_| ApiError::Unauthenticated(format!("malformed {SUBJECT_ID_HEADER}")))?;
  let subject_id = Uuid::parse_str(raw.trim())
    .map_err(|_| ApiError::Unauthenticated(format!("malformed {SUBJECT_ID_HEADER}")))?;

  let is_admin = headers
    .get(SUBJECT_ROLE_HEADER)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|role| role.trim().eq_ignore_ascii_case("admin"));

  Ok(Caller { subject_id, is_admin })
}

impl<S> FromRequestParts<S> for CallerIdentity
where
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    _state: &S,
  ) -> Result<Self, Self::Rejection> {
    resolve_caller(&parts.headers).map(CallerIdentity)
  }
}

#[cfg(test)]
mod tests {
  use axum::http::Request;

  use super::*;

  async fn extract(req: Request<()>) -> Result<CallerIdentity, ApiError> {
    let (mut parts, _) = req.into_parts();
    CallerIdentity::from_request_parts(&mut parts, &()).await
  }

  #[tokio::test]
  async fn subject_without_role() {
    let id = Uuid::new_v4();
    let req = Request::builder()
      .header(SUBJECT_ID_HEADER, id.to_string())
      .body(())
      .unwrap();
    let CallerIdentity(caller) = extract(req).await.unwrap();
    assert_eq!(caller, Caller::subject(id));
  }

  #[tokio::test]
  async fn admin_role() {
    let id = Uuid::new_v4();
    let req = Request::builder()
      .header(SUBJECT_ID_HEADER, id.to_string())
      .header(SUBJECT_ROLE_HEADER, "Admin")
      .body(())
      .unwrap();
    let CallerIdentity(caller) = extract(req).await.unwrap();
    assert!(caller.is_admin);
  }

  #[tokio::test]
  async fn missing_header() {
    let req = Request::builder().body(()).unwrap();
    assert!(matches!(extract(req).await, Err(ApiError::Unauthenticated(_))));
  }

  #[tokio::test]
  async fn malformed_subject_id() {
    let req = Request::builder()
      .header(SUBJECT_ID_HEADER, "not-a-uuid")
      .body(())
      .unwrap();
    assert!(matches!(extract(req).await, Err(ApiError::Unauthenticated(_))));
  }
}
