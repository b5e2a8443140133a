//! The operations payload model.
//!
//! External producers submit an ordered batch of operations; each operation
//! describes one source file and the events/annotations/explicit references
//! it carries. The model is a tagged union validated once at the serde
//! boundary — anything that deserialises is structurally sound, and anything
//! that does not is a `FILE_NOT_VALID` outcome at the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::values::ValueSpec;

// ─── Batch ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationBatch {
  pub operations: Vec<Operation>,
}

/// `mode` selects the operation kind; `insert` is the only mode of this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Operation {
  Insert(InsertOperation),
}

// No deny_unknown_fields here: the `mode` tag of the enclosing internally
// tagged enum is still visible to the variant struct during deserialisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertOperation {
  pub dim_signature: DimSignatureSpec,
  pub source:        SourceSpec,
  #[serde(default)]
  pub explicit_references: Vec<ExplicitRefSpec>,
  #[serde(default)]
  pub events: Vec<EventSpec>,
  #[serde(default)]
  pub annotations: Vec<AnnotationSpec>,
}

// ─── References ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DimSignatureSpec {
  pub name:    String,
  pub exec:    String,
  pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
  pub name: String,
  #[serde(with = "crate::time::flexible")]
  pub generation_time: DateTime<Utc>,
  #[serde(with = "crate::time::flexible")]
  pub validity_start: DateTime<Utc>,
  #[serde(with = "crate::time::flexible")]
  pub validity_stop: DateTime<Utc>,
  #[serde(default)]
  pub priority: Option<i64>,
}

/// A declaration of an explicit reference, optionally grouping it and
/// linking it to other references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExplicitRefSpec {
  pub name: String,
  #[serde(default)]
  pub group: Option<String>,
  #[serde(default)]
  pub links: Vec<RefLinkSpec>,
}

/// A directed relation from the declaring reference to `link`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefLinkSpec {
  /// Name of the target explicit reference; created lazily if absent.
  pub link: String,
  pub name: String,
  /// When present, the mirrored inverse link is created under this name.
  #[serde(default)]
  pub back_ref: Option<String>,
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Dedup strategy selector carried on each gauge reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertionType {
  #[serde(rename = "SIMPLE_UPDATE")]
  SimpleUpdate,
  #[serde(rename = "EVENT_KEYS")]
  EventKeys,
  #[serde(rename = "ERASE_and_REPLACE")]
  EraseAndReplace,
}

impl InsertionType {
  /// Visibility seed for newly written events: pending-resolution strategies
  /// insert invisible and let the resolver decide.
  pub fn seed_visible(&self) -> bool {
    matches!(self, Self::SimpleUpdate)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GaugeSpec {
  pub name: String,
  #[serde(default)]
  pub system: Option<String>,
  pub insertion_type: InsertionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
  /// Target is a `link_ref` declared by exactly one event in the same batch.
  ByRef,
  /// Target is an already-persisted event identifier, given literally.
  ByUuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventLinkSpec {
  /// Target designator; interpreted per `link_mode`.
  pub link:      String,
  pub link_mode: LinkMode,
  pub name:      String,
  /// When present, the mirrored inverse link is created under this name.
  #[serde(default)]
  pub back_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventSpec {
  /// Symbolic handle other events in the same batch may link to.
  #[serde(default)]
  pub link_ref: Option<String>,
  #[serde(default)]
  pub explicit_reference: Option<String>,
  /// Dedup key; resolution is triggered only for EVENT_KEYS gauges.
  #[serde(default)]
  pub key: Option<String>,
  pub gauge: GaugeSpec,
  #[serde(with = "crate::time::flexible")]
  pub start: DateTime<Utc>,
  #[serde(with = "crate::time::flexible")]
  pub stop: DateTime<Utc>,
  #[serde(default)]
  pub links: Vec<EventLinkSpec>,
  #[serde(default)]
  pub values: Vec<ValueSpec>,
}

// ─── Annotations ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnotationCnfSpec {
  pub name: String,
  #[serde(default)]
  pub system: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnotationSpec {
  pub explicit_reference: String,
  pub annotation_cnf:     AnnotationCnfSpec,
  #[serde(default)]
  pub values: Vec<ValueSpec>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn minimal_op(insertion_type: &str) -> serde_json::Value {
    serde_json::json!({
      "operations": [{
        "mode": "insert",
        "dim_signature": {"name": "DIM_RECEIVED", "exec": "proc", "version": "1.0"},
        "source": {
          "name": "report_1.json",
          "generation_time": "2020-06-05T02:07:03",
          "validity_start": "2020-06-05T02:07:03",
          "validity_stop": "2020-06-05T08:07:36"
        },
        "events": [{
          "gauge": {"name": "GAUGE", "system": "SYS", "insertion_type": insertion_type},
          "start": "2020-06-05T02:07:03",
          "stop": "2020-06-05T08:07:36"
        }]
      }]
    })
  }

  #[test]
  fn insert_operation_round_trips() {
    let batch: OperationBatch =
      serde_json::from_value(minimal_op("SIMPLE_UPDATE")).unwrap();
    let Operation::Insert(op) = &batch.operations[0];
    assert_eq!(op.source.name, "report_1.json");
    assert_eq!(
      op.events[0].gauge.insertion_type,
      InsertionType::SimpleUpdate
    );
  }

  #[test]
  fn unknown_insertion_type_is_rejected() {
    let result: Result<OperationBatch, _> =
      serde_json::from_value(minimal_op("INSERT_and_ERASE"));
    assert!(result.is_err());
  }

  #[test]
  fn malformed_timestamp_is_rejected() {
    let mut raw = minimal_op("SIMPLE_UPDATE");
    raw["operations"][0]["source"]["generation_time"] =
      serde_json::json!("yesterday");
    let result: Result<OperationBatch, _> = serde_json::from_value(raw);
    assert!(result.is_err());
  }

  #[test]
  fn unknown_mode_is_rejected() {
    let mut raw = minimal_op("SIMPLE_UPDATE");
    raw["operations"][0]["mode"] = serde_json::json!("delete");
    let result: Result<OperationBatch, _> = serde_json::from_value(raw);
    assert!(result.is_err());
  }
}
