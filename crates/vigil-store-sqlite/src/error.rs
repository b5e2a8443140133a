//! Error type for `vigil-store-sqlite`.
//!
//! Constraint violations are classified out of the SQLite extended error
//! codes because callers dispatch on them: the registry recovers from unique
//! violations by re-reading, and the writer reports link-time constraint
//! violations as a links-inconsistency fault.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  /// A UNIQUE or PRIMARY KEY constraint rejected an insert.
  #[error("unique constraint violated: {0}")]
  UniqueViolation(String),

  /// A FOREIGN KEY constraint rejected a write.
  #[error("foreign key constraint violated: {0}")]
  ForeignKeyViolation(String),

  #[error("core error: {0}")]
  Core(#[from] vigil_core::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),
}

impl Error {
  pub fn is_constraint_violation(&self) -> bool {
    matches!(self, Self::UniqueViolation(_) | Self::ForeignKeyViolation(_))
  }
}

impl From<tokio_rusqlite::Error> for Error {
  fn from(e: tokio_rusqlite::Error) -> Self {
    if let tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
      ffi,
      ref message,
    )) = e
    {
      let detail = message.clone().unwrap_or_default();
      match ffi.extended_code {
        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
          return Self::UniqueViolation(detail);
        }
        rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
          return Self::ForeignKeyViolation(detail);
        }
        _ => {}
      }
    }
    Self::Database(e)
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
