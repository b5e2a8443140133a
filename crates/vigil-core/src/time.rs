//! Timestamp parsing and formatting.
//!
//! All persisted timestamps are fixed-width RFC 3339 with microsecond
//! precision and a `Z` suffix, so lexicographic order over the stored text
//! equals chronological order. Payload timestamps additionally accept the
//! naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` form produced by mission processors,
//! taken as UTC.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};

/// Canonical text form: `2020-06-05T02:07:03.000000Z`.
pub fn format_ts(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse either an RFC 3339 timestamp (any offset) or a naive UTC one.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Ok(dt.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
    .map(|naive| naive.and_utc())
    .map_err(|_| Error::TimestampParse(s.to_owned()))
}

/// Serde adapter for payload timestamp fields; see [`parse_ts`].
pub mod flexible {
  use chrono::{DateTime, Utc};
  use serde::{Deserialize as _, Deserializer, Serializer, de};

  pub fn serialize<S: Serializer>(
    dt: &DateTime<Utc>,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&super::format_ts(*dt))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    super::parse_ts(&raw).map_err(de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;

  #[test]
  fn naive_timestamps_are_utc() {
    let dt = parse_ts("2020-06-05T02:07:03").unwrap();
    assert_eq!(dt, Utc.with_ymd_and_hms(2020, 6, 5, 2, 7, 3).unwrap());
  }

  #[test]
  fn rfc3339_offset_is_normalised() {
    let dt = parse_ts("2020-06-05T04:07:03+02:00").unwrap();
    assert_eq!(format_ts(dt), "2020-06-05T02:07:03.000000Z");
  }

  #[test]
  fn canonical_form_is_fixed_width() {
    let a = parse_ts("2020-06-05T02:07:03.5").unwrap();
    let b = parse_ts("2020-06-05T02:07:03.25").unwrap();
    // Text order must equal time order.
    assert!(format_ts(b) < format_ts(a));
  }

  #[test]
  fn garbage_is_rejected() {
    assert!(parse_ts("last tuesday").is_err());
  }
}
