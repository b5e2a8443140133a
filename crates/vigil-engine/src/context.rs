//! Request-scoped ingestion context.
//!
//! One [`IngestContext`] exists per operation. It carries the id maps
//! produced by the registry and the pending-deprecation scopes accumulated by
//! the writer, and is dropped when the operation finishes. No state outlives
//! the operation or is shared between concurrent callers.

use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;
use vigil_core::model::{AnnotationCnf, DimSignature, ExplicitRef, Gauge, Source};

/// Canonical map key for (name, system) scoped entities; `None` systems map
/// to the empty string, mirroring the stored natural key.
pub fn scope_key(name: &str, system: &Option<String>) -> (String, String) {
  (name.to_owned(), system.clone().unwrap_or_default())
}

pub struct IngestContext {
  pub dim_signature: DimSignature,
  pub source:        Source,

  /// Gauges resolved for this operation, by (name, system).
  pub gauges: HashMap<(String, String), Gauge>,
  /// Annotation configurations resolved for this operation, by (name, system).
  pub annotation_cnfs: HashMap<(String, String), AnnotationCnf>,
  /// Explicit references resolved for this operation, by name.
  pub explicit_refs: HashMap<String, ExplicitRef>,

  /// Gauges whose events await interval-based resolution.
  pub pending_erase_gauges: BTreeSet<Uuid>,
  /// Keys whose events await per-key resolution.
  pub pending_event_keys: BTreeSet<String>,
  /// (configuration, reference) scopes whose annotations await resolution.
  pub pending_annotation_scopes: BTreeSet<(Uuid, Uuid)>,
}

impl IngestContext {
  pub fn new(dim_signature: DimSignature, source: Source) -> Self {
    Self {
      dim_signature,
      source,
      gauges: HashMap::new(),
      annotation_cnfs: HashMap::new(),
      explicit_refs: HashMap::new(),
      pending_erase_gauges: BTreeSet::new(),
      pending_event_keys: BTreeSet::new(),
      pending_annotation_scopes: BTreeSet::new(),
    }
  }
}
