//! Error type for `venue-store-sqlite`.

use rusqlite::ErrorCode;
use thiserror::Error;
use venue_core::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held text that does not decode to its domain type.
  #[error("decode error: {0}")]
  Decode(String),
}

impl StoreError for Error {
  fn is_conflict(&self) -> bool {
    let Error::Database(tokio_rusqlite::Error::Rusqlite(
      rusqlite::Error::SqliteFailure(e, _),
    )) = self
    else {
      return false;
    };
    matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
      || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
