//! Processing statuses for the source ledger.
//!
//! Every source accumulates an append-only status history:
//! `REGISTERED → INGESTION_STARTED → {OK | failure}`. Terminal failure
//! statuses retain the operation's raw payload for postmortem; OK clears it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
  Registered,
  IngestionStarted,
  Ok,
  SourceAlreadyIngested,
  WrongPeriod,
  WrongValue,
  OddNumberOfCoordinates,
  WrongGeometry,
  UndefinedEventLink,
  DuplicatedEventLinkRef,
  LinksInconsistency,
  FileNotValid,
}

impl ProcessingStatus {
  /// The discriminant string stored in the `source_statuses` table.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Registered => "REGISTERED",
      Self::IngestionStarted => "INGESTION_STARTED",
      Self::Ok => "OK",
      Self::SourceAlreadyIngested => "SOURCE_ALREADY_INGESTED",
      Self::WrongPeriod => "WRONG_PERIOD",
      Self::WrongValue => "WRONG_VALUE",
      Self::OddNumberOfCoordinates => "ODD_NUMBER_OF_COORDINATES",
      Self::WrongGeometry => "WRONG_GEOMETRY",
      Self::UndefinedEventLink => "UNDEFINED_EVENT_LINK",
      Self::DuplicatedEventLinkRef => "DUPLICATED_EVENT_LINK_REF",
      Self::LinksInconsistency => "LINKS_INCONSISTENCY",
      Self::FileNotValid => "FILE_NOT_VALID",
    }
  }

  pub fn decode(s: &str) -> Result<Self> {
    match s {
      "REGISTERED" => Ok(Self::Registered),
      "INGESTION_STARTED" => Ok(Self::IngestionStarted),
      "OK" => Ok(Self::Ok),
      "SOURCE_ALREADY_INGESTED" => Ok(Self::SourceAlreadyIngested),
      "WRONG_PERIOD" => Ok(Self::WrongPeriod),
      "WRONG_VALUE" => Ok(Self::WrongValue),
      "ODD_NUMBER_OF_COORDINATES" => Ok(Self::OddNumberOfCoordinates),
      "WRONG_GEOMETRY" => Ok(Self::WrongGeometry),
      "UNDEFINED_EVENT_LINK" => Ok(Self::UndefinedEventLink),
      "DUPLICATED_EVENT_LINK_REF" => Ok(Self::DuplicatedEventLinkRef),
      "LINKS_INCONSISTENCY" => Ok(Self::LinksInconsistency),
      "FILE_NOT_VALID" => Ok(Self::FileNotValid),
      other => Err(Error::UnknownStatus(other.to_owned())),
    }
  }

  /// Statuses that end an ingestion attempt (successfully or not).
  pub fn is_terminal(&self) -> bool {
    !matches!(self, Self::Registered | Self::IngestionStarted)
  }

  pub fn is_failure(&self) -> bool {
    self.is_terminal() && !matches!(self, Self::Ok)
  }
}

impl std::fmt::Display for ProcessingStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}
