//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  extract::rejection::{JsonRejection, PathRejection, QueryRejection},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use venue_core::ErrorKind;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  /// The request carried no usable caller identity.
  #[error("unauthenticated: {0}")]
  Unauthenticated(String),

  /// The request body, query or path did not deserialize.
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error(transparent)]
  Booking(#[from] venue_core::Error),
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self {
    Self::BadRequest(rejection.body_text())
  }
}

impl From<QueryRejection> for ApiError {
  fn from(rejection: QueryRejection) -> Self {
    Self::BadRequest(rejection.body_text())
  }
}

impl From<PathRejection> for ApiError {
  fn from(rejection: PathRejection) -> Self {
    Self::BadRequest(rejection.body_text())
  }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
  pub error:     String,
  pub kind:      &'static str,
  pub retryable: bool,
}

impl ErrorBody {
  pub fn from_booking(e: &venue_core::Error) -> Self {
    let kind = e.kind();
    let error = match kind {
      ErrorKind::Infrastructure => "internal error".to_owned(),
      _ => e.to_string(),
    };
    Self { error, kind: kind.into(), retryable: e.is_retryable() }
  }
}

/// HTTP status for each error category.
pub fn status_for(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::Validation => StatusCode::BAD_REQUEST,
    ErrorKind::NotFound => StatusCode::NOT_FOUND,
    ErrorKind::Authorization => StatusCode::FORBIDDEN,
    ErrorKind::CapacityExceeded
    | ErrorKind::DuplicateActiveReservation
    | ErrorKind::StateTransition
    | ErrorKind::Conflict => StatusCode::CONFLICT,
    ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, body) = match &self {
      ApiError::Unauthenticated(m) => (StatusCode::UNAUTHORIZED, ErrorBody {
        error:     m.clone(),
        kind:      "authentication",
        retryable: false,
      }),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, ErrorBody {
        error:     m.clone(),
        kind:      "validation",
        retryable: false,
      }),
      ApiError::Booking(e) => {
        if e.kind() == ErrorKind::Infrastructure {
          tracing::error!(error = %e, "request failed");
        }
        (status_for(e.kind()), ErrorBody::from_booking(e))
      }
    };
    (status, Json(body)).into_response()
  }
}
