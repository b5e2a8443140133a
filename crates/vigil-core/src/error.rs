//! Error types for `vigil-core`.
//!
//! [`Fault`] is the domain-failure taxonomy: every variant maps onto a
//! terminal [`ProcessingStatus`](crate::status::ProcessingStatus) written to
//! the source ledger. Faults are carried as values through the ingestion
//! pipeline; [`Error`] is reserved for data that cannot be interpreted at all
//! (corrupt persisted state, unparseable timestamps).

use thiserror::Error;

use crate::status::ProcessingStatus;

// ─── Domain faults ───────────────────────────────────────────────────────────

/// A business-rule failure that aborts the current operation only.
///
/// Faults never escape `treat_data` as errors; they are recorded as the
/// operation's terminal processing status and returned as its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
  /// The source was already successfully ingested; nothing is re-done.
  #[error("source {0} has already been ingested")]
  SourceAlreadyIngested(String),

  /// A validity or event period with stop < start, or an event period
  /// outside its source's validity window.
  #[error("wrong period: {0}")]
  WrongPeriod(String),

  /// A typed leaf value that does not convert to its declared type.
  #[error("wrong value for {name}: {value:?}")]
  WrongValue { name: String, value: String },

  /// A geometry coordinate list with an odd number of coordinates.
  #[error("odd number of coordinates for geometry {0}")]
  OddNumberOfCoordinates(String),

  /// A coordinate list that does not assemble into a valid polygon.
  #[error("wrong geometry for {0}")]
  WrongGeometry(String),

  /// A `by_ref` link whose target `link_ref` is declared by no event in the
  /// same operation.
  #[error("undefined event link reference: {0}")]
  UndefinedEventLink(String),

  /// The same `link_ref` declared by two events in one operation.
  #[error("duplicated event link reference: {0}")]
  DuplicatedEventLinkRef(String),

  /// A constraint violation surfaced while persisting links (e.g. a dangling
  /// `by_uuid` target or a duplicated link row).
  #[error("event links are inconsistent")]
  LinksInconsistency,

  /// The payload did not validate against the operations schema.
  #[error("file not valid: {0}")]
  FileNotValid(String),
}

impl Fault {
  /// The terminal ledger status this fault is recorded as.
  pub fn status(&self) -> ProcessingStatus {
    match self {
      Self::SourceAlreadyIngested(_) => ProcessingStatus::SourceAlreadyIngested,
      Self::WrongPeriod(_) => ProcessingStatus::WrongPeriod,
      Self::WrongValue { .. } => ProcessingStatus::WrongValue,
      Self::OddNumberOfCoordinates(_) => {
        ProcessingStatus::OddNumberOfCoordinates
      }
      Self::WrongGeometry(_) => ProcessingStatus::WrongGeometry,
      Self::UndefinedEventLink(_) => ProcessingStatus::UndefinedEventLink,
      Self::DuplicatedEventLinkRef(_) => {
        ProcessingStatus::DuplicatedEventLinkRef
      }
      Self::LinksInconsistency => ProcessingStatus::LinksInconsistency,
      Self::FileNotValid(_) => ProcessingStatus::FileNotValid,
    }
  }
}

// ─── Hard errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
  #[error("timestamp parse error: {0:?}")]
  TimestampParse(String),

  /// Persisted value rows that do not reassemble into a tree (orphan rows,
  /// leaves without payload, unknown kinds).
  #[error("malformed value tree: {0}")]
  MalformedValueTree(String),

  #[error("unknown processing status: {0:?}")]
  UnknownStatus(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
