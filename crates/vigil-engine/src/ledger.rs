//! The source/processing ledger.
//!
//! One row per ingested file per (name, DIM signature, processor version).
//! Registration is race-safe in the same insert-then-reread style as the
//! registry; the loser of a creation race re-targets the winner's row if —
//! and only if — that row never finished ingesting.

use chrono::Utc;
use uuid::Uuid;
use vigil_core::{
  Fault,
  model::Source,
  operation::InsertOperation,
  status::ProcessingStatus,
};
use vigil_store_sqlite::{Error as StoreError, VigilStore};

use crate::Result;

/// Outcome of source registration.
pub enum SourceRegistration {
  /// The row is ours to ingest into.
  Ready(Source),
  /// A completed ingestion already exists for this natural key.
  AlreadyIngested(Source),
}

/// Validity periods must be well-formed before any child row is written.
pub fn validate_validity(op: &InsertOperation) -> Result<(), Fault> {
  if op.source.validity_stop < op.source.validity_start {
    return Err(Fault::WrongPeriod(format!(
      "source {} validity stops before it starts",
      op.source.name
    )));
  }
  Ok(())
}

/// Register (or adopt) the source row for this operation and append the
/// REGISTERED status.
pub async fn register_source(
  store: &VigilStore,
  dim_signature_id: Uuid,
  op: &InsertOperation,
) -> Result<SourceRegistration> {
  let now = Utc::now();
  loop {
    if let Some(existing) = store
      .find_source(&op.source.name, dim_signature_id, &op.dim_signature.version)
      .await?
    {
      if existing.ingestion_duration_ms.is_some() {
        return Ok(SourceRegistration::AlreadyIngested(existing));
      }
      // A row left behind by a writer that never finished: take it over.
      let retargeted = Source {
        generation_time: op.source.generation_time,
        validity_start: op.source.validity_start,
        validity_stop: op.source.validity_stop,
        priority: op.source.priority,
        ingestion_time: now,
        ingestion_duration_ms: None,
        parse_error: None,
        ..existing
      };
      store.retarget_source(&retargeted).await?;
      store
        .insert_source_status(
          retargeted.source_id,
          ProcessingStatus::Registered,
          now,
        )
        .await?;
      return Ok(SourceRegistration::Ready(retargeted));
    }

    let candidate = Source {
      source_id:             Uuid::new_v4(),
      name:                  op.source.name.clone(),
      dim_signature_id,
      processor_version:     op.dim_signature.version.clone(),
      generation_time:       op.source.generation_time,
      validity_start:        op.source.validity_start,
      validity_stop:         op.source.validity_stop,
      priority:              op.source.priority,
      ingestion_time:        now,
      ingestion_duration_ms: None,
      parse_error:           None,
    };
    match store.insert_source(&candidate).await {
      Ok(()) => {
        store
          .insert_source_status(
            candidate.source_id,
            ProcessingStatus::Registered,
            now,
          )
          .await?;
        return Ok(SourceRegistration::Ready(candidate));
      }
      Err(StoreError::UniqueViolation(_)) => continue,
      Err(e) => return Err(e.into()),
    }
  }
}

/// Record a terminal failure: status row plus the raw operation payload for
/// postmortem.
pub async fn record_failure(
  store: &VigilStore,
  source_id: Uuid,
  fault: &Fault,
  op: &InsertOperation,
) -> Result<()> {
  let payload = serde_json::to_string(op).map_err(vigil_core::Error::from)?;
  store
    .record_source_failure(source_id, fault.status(), Utc::now(), Some(payload))
    .await?;
  Ok(())
}

/// Record success: OK status, ingestion duration, payload cleared.
pub async fn finalize_ok(
  store: &VigilStore,
  source: &Source,
) -> Result<()> {
  let now = Utc::now();
  let duration_ms =
    now.signed_duration_since(source.ingestion_time).num_milliseconds();
  store.finalize_source_ok(source.source_id, now, duration_ms).await?;
  Ok(())
}
