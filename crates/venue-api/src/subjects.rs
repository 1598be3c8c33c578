//! Handlers for `/subjects` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST`   | `/subjects/me` | Register the caller; idempotent, returns 201 |
//! | `DELETE` | `/subjects/{id}` | Self or admin; the subject's reservations are reconciled later |

use axum::{
  Json,
  extract::State,
  http::StatusCode,
  response::IntoResponse,
};
use uuid::Uuid;
use venue_booking::SubjectDirectory;
use venue_core::store::BookingStore;

use crate::{
  caller::CallerIdentity,
  error::ApiError,
  extract::ApiPath,
};

/// `POST /subjects/me`
pub async fn register<S>(
  State(directory): State<SubjectDirectory<S>>,
  CallerIdentity(caller): CallerIdentity,
) -> Result<impl IntoResponse, ApiError>
where
  S: BookingStore + 'static,
{
  let subject = directory.register(&caller).await?;
  Ok((StatusCode::CREATED, Json(subject)))
}

/// `DELETE /subjects/{id}`
pub async fn remove<S>(
  State(directory): State<SubjectDirectory<S>>,
  CallerIdentity(caller): CallerIdentity,
  ApiPath(id): ApiPath<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: BookingStore + 'static,
{
  directory.remove(&caller, id).await?;
  Ok(StatusCode::NO_CONTENT)
}
