//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 (microseconds, `Z`
//! suffix) so lexicographic order equals chronological order. UUIDs are
//! stored as hyphenated lowercase strings. Gauge/configuration systems store
//! `''` for "no system" so natural keys stay unique.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use vigil_core::{
  model::{
    Annotation, AnnotationCnf, DimSignature, Event, EventKey, EventLink,
    ExplicitRef, ExplicitRefGroup, ExplicitRefLink, Gauge, Source,
  },
  time,
  values::{ValueKind, ValueRow},
};

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String {
  id.hyphenated().to_string()
}

pub fn decode_uuid(s: &str) -> Result<Uuid> {
  Ok(Uuid::parse_str(s)?)
}

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  time::format_ts(dt)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  time::parse_ts(s).map_err(|_| Error::DateParse(s.to_owned()))
}

pub fn encode_system(system: &Option<String>) -> String {
  system.clone().unwrap_or_default()
}

pub fn decode_system(s: String) -> Option<String> {
  if s.is_empty() { None } else { Some(s) }
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub struct RawDimSignature {
  pub dim_signature_id: String,
  pub name:             String,
  pub exec:             String,
}

impl RawDimSignature {
  pub fn into_model(self) -> Result<DimSignature> {
    Ok(DimSignature {
      dim_signature_id: decode_uuid(&self.dim_signature_id)?,
      name:             self.name,
      exec:             self.exec,
    })
  }
}

pub struct RawSource {
  pub source_id:             String,
  pub name:                  String,
  pub dim_signature_id:      String,
  pub processor_version:     String,
  pub generation_time:       String,
  pub validity_start:        String,
  pub validity_stop:         String,
  pub priority:              Option<i64>,
  pub ingestion_time:        String,
  pub ingestion_duration_ms: Option<i64>,
  pub parse_error:           Option<String>,
}

impl RawSource {
  pub fn into_model(self) -> Result<Source> {
    Ok(Source {
      source_id:             decode_uuid(&self.source_id)?,
      name:                  self.name,
      dim_signature_id:      decode_uuid(&self.dim_signature_id)?,
      processor_version:     self.processor_version,
      generation_time:       decode_dt(&self.generation_time)?,
      validity_start:        decode_dt(&self.validity_start)?,
      validity_stop:         decode_dt(&self.validity_stop)?,
      priority:              self.priority,
      ingestion_time:        decode_dt(&self.ingestion_time)?,
      ingestion_duration_ms: self.ingestion_duration_ms,
      parse_error:           self.parse_error,
    })
  }
}

pub struct RawGauge {
  pub gauge_id:         String,
  pub name:             String,
  pub system:           String,
  pub dim_signature_id: String,
}

impl RawGauge {
  pub fn into_model(self) -> Result<Gauge> {
    Ok(Gauge {
      gauge_id:         decode_uuid(&self.gauge_id)?,
      name:             self.name,
      system:           decode_system(self.system),
      dim_signature_id: decode_uuid(&self.dim_signature_id)?,
    })
  }
}

pub struct RawAnnotationCnf {
  pub annotation_cnf_id: String,
  pub name:              String,
  pub system:            String,
  pub dim_signature_id:  String,
}

impl RawAnnotationCnf {
  pub fn into_model(self) -> Result<AnnotationCnf> {
    Ok(AnnotationCnf {
      annotation_cnf_id: decode_uuid(&self.annotation_cnf_id)?,
      name:              self.name,
      system:            decode_system(self.system),
      dim_signature_id:  decode_uuid(&self.dim_signature_id)?,
    })
  }
}

pub struct RawExplicitRefGroup {
  pub group_id: String,
  pub name:     String,
}

impl RawExplicitRefGroup {
  pub fn into_model(self) -> Result<ExplicitRefGroup> {
    Ok(ExplicitRefGroup {
      group_id: decode_uuid(&self.group_id)?,
      name:     self.name,
    })
  }
}

pub struct RawExplicitRef {
  pub explicit_ref_id: String,
  pub name:            String,
  pub group_id:        Option<String>,
  pub ingestion_time:  String,
}

impl RawExplicitRef {
  pub fn into_model(self) -> Result<ExplicitRef> {
    Ok(ExplicitRef {
      explicit_ref_id: decode_uuid(&self.explicit_ref_id)?,
      name:            self.name,
      group_id:        self
        .group_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
      ingestion_time:  decode_dt(&self.ingestion_time)?,
    })
  }
}

pub struct RawExplicitRefLink {
  pub link_id:              String,
  pub explicit_ref_id_from: String,
  pub explicit_ref_id_to:   String,
  pub name:                 String,
}

impl RawExplicitRefLink {
  pub fn into_model(self) -> Result<ExplicitRefLink> {
    Ok(ExplicitRefLink {
      link_id:              decode_uuid(&self.link_id)?,
      explicit_ref_id_from: decode_uuid(&self.explicit_ref_id_from)?,
      explicit_ref_id_to:   decode_uuid(&self.explicit_ref_id_to)?,
      name:                 self.name,
    })
  }
}

pub struct RawEvent {
  pub event_uuid:      String,
  pub start:           String,
  pub stop:            String,
  pub gauge_id:        String,
  pub explicit_ref_id: Option<String>,
  pub source_id:       String,
  pub visible:         bool,
  pub ingestion_time:  String,
}

impl RawEvent {
  pub fn into_model(self) -> Result<Event> {
    Ok(Event {
      event_uuid:      decode_uuid(&self.event_uuid)?,
      start:           decode_dt(&self.start)?,
      stop:            decode_dt(&self.stop)?,
      gauge_id:        decode_uuid(&self.gauge_id)?,
      explicit_ref_id: self
        .explicit_ref_id
        .as_deref()
        .map(decode_uuid)
        .transpose()?,
      source_id:       decode_uuid(&self.source_id)?,
      visible:         self.visible,
      ingestion_time:  decode_dt(&self.ingestion_time)?,
    })
  }
}

pub struct RawEventKey {
  pub key_id:           String,
  pub event_key:        String,
  pub dim_signature_id: String,
  pub event_uuid:       String,
  pub visible:          bool,
}

impl RawEventKey {
  pub fn into_model(self) -> Result<EventKey> {
    Ok(EventKey {
      key_id:           decode_uuid(&self.key_id)?,
      event_key:        self.event_key,
      dim_signature_id: decode_uuid(&self.dim_signature_id)?,
      event_uuid:       decode_uuid(&self.event_uuid)?,
      visible:          self.visible,
    })
  }
}

pub struct RawEventLink {
  pub link_id:         String,
  pub event_uuid_from: String,
  pub event_uuid_to:   String,
  pub name:            String,
}

impl RawEventLink {
  pub fn into_model(self) -> Result<EventLink> {
    Ok(EventLink {
      link_id:         decode_uuid(&self.link_id)?,
      event_uuid_from: decode_uuid(&self.event_uuid_from)?,
      event_uuid_to:   decode_uuid(&self.event_uuid_to)?,
      name:            self.name,
    })
  }
}

pub struct RawAnnotation {
  pub annotation_uuid:   String,
  pub annotation_cnf_id: String,
  pub explicit_ref_id:   String,
  pub source_id:         String,
  pub visible:           bool,
  pub ingestion_time:    String,
}

impl RawAnnotation {
  pub fn into_model(self) -> Result<Annotation> {
    Ok(Annotation {
      annotation_uuid:   decode_uuid(&self.annotation_uuid)?,
      annotation_cnf_id: decode_uuid(&self.annotation_cnf_id)?,
      explicit_ref_id:   decode_uuid(&self.explicit_ref_id)?,
      source_id:         decode_uuid(&self.source_id)?,
      visible:           self.visible,
      ingestion_time:    decode_dt(&self.ingestion_time)?,
    })
  }
}

pub struct RawValueRow {
  pub owner:           String,
  pub name:            String,
  pub kind:            String,
  pub payload:         Option<String>,
  pub level_position:  i64,
  pub parent_level:    i64,
  pub parent_position: i64,
}

impl RawValueRow {
  pub fn into_model(self) -> Result<(Uuid, ValueRow)> {
    let owner = decode_uuid(&self.owner)?;
    let kind = ValueKind::decode(&self.kind)?;
    Ok((owner, ValueRow {
      name: self.name,
      kind,
      payload: self.payload,
      level_position: self.level_position,
      parent_level: self.parent_level,
      parent_position: self.parent_position,
    }))
  }
}
