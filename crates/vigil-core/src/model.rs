//! Persisted entity model.
//!
//! These are the rows the store reads and writes. Reference entities
//! (signatures, gauges, configurations, explicit references) are created once
//! by the registry and never mutated; events and annotations are created by
//! the writer and mutated only by the deprecation resolver (visibility flips,
//! replacement by split fragments, deletion).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Reference entities ──────────────────────────────────────────────────────

/// Namespace identifying a producing pipeline (name + executable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimSignature {
  pub dim_signature_id: Uuid,
  pub name:             String,
  pub exec:             String,
}

/// Named, system-scoped measurement channel; the dedup scope for
/// interval-based strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gauge {
  pub gauge_id:         Uuid,
  pub name:             String,
  pub system:           Option<String>,
  pub dim_signature_id: Uuid,
}

/// Annotation configuration; with an explicit reference it forms the dedup
/// scope for annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationCnf {
  pub annotation_cnf_id: Uuid,
  pub name:              String,
  pub system:            Option<String>,
  pub dim_signature_id:  Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplicitRefGroup {
  pub group_id: Uuid,
  pub name:     String,
}

/// An external domain identifier events/annotations attach to. Created
/// lazily the first time it is referenced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplicitRef {
  pub explicit_ref_id: Uuid,
  pub name:            String,
  pub group_id:        Option<Uuid>,
  pub ingestion_time:  DateTime<Utc>,
}

/// A named, directed relation between two explicit references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplicitRefLink {
  pub link_id:             Uuid,
  pub explicit_ref_id_from: Uuid,
  pub explicit_ref_id_to:   Uuid,
  pub name:                String,
}

// ─── Sources ─────────────────────────────────────────────────────────────────

/// One row per ingested file per (name, DIM signature, processor version).
///
/// A source with a non-null `ingestion_duration_ms` is immutable; one without
/// it may be re-targeted by a concurrent writer that lost the creation race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
  pub source_id:             Uuid,
  pub name:                  String,
  pub dim_signature_id:      Uuid,
  pub processor_version:     String,
  pub generation_time:       DateTime<Utc>,
  pub validity_start:        DateTime<Utc>,
  pub validity_stop:         DateTime<Utc>,
  pub priority:              Option<i64>,
  pub ingestion_time:        DateTime<Utc>,
  pub ingestion_duration_ms: Option<i64>,
  pub parse_error:           Option<String>,
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
  pub event_uuid:      Uuid,
  pub start:           DateTime<Utc>,
  pub stop:            DateTime<Utc>,
  pub gauge_id:        Uuid,
  pub explicit_ref_id: Option<Uuid>,
  pub source_id:       Uuid,
  pub visible:         bool,
  pub ingestion_time:  DateTime<Utc>,
}

/// A dedup handle independent of time geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventKey {
  pub key_id:           Uuid,
  pub event_key:        String,
  pub dim_signature_id: Uuid,
  pub event_uuid:       Uuid,
  pub visible:          bool,
}

/// A directed, named link between two events. Symmetric pairs are two rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLink {
  pub link_id:         Uuid,
  pub event_uuid_from: Uuid,
  pub event_uuid_to:   Uuid,
  pub name:            String,
}

// ─── Annotations ─────────────────────────────────────────────────────────────

/// Structurally an event without temporal extent; dedup scope is
/// (annotation configuration, explicit reference).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
  pub annotation_uuid:   Uuid,
  pub annotation_cnf_id: Uuid,
  pub explicit_ref_id:   Uuid,
  pub source_id:         Uuid,
  pub visible:           bool,
  pub ingestion_time:    DateTime<Utc>,
}
