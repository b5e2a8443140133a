//! The ingestion orchestrator.
//!
//! `treat_data` sequences each operation through ledger → registry → writer →
//! resolver → finalisation. A domain fault records the failure status plus
//! the raw payload and aborts the rest of the batch; the caller receives one
//! outcome per attempted operation, in submission order, ending at the first
//! failure.

use chrono::Utc;
use vigil_core::{
  Fault,
  model::Source,
  operation::{InsertOperation, Operation, OperationBatch},
  status::ProcessingStatus,
};
use vigil_store_sqlite::VigilStore;

use crate::{
  Result,
  context::IngestContext,
  ledger::{self, SourceRegistration},
  locks::GaugeLocks,
  registry, resolver, writer,
};

/// One entry of `treat_data`'s reply, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
  pub source: String,
  pub status: ProcessingStatus,
}

/// The engine owns the store handle and the per-gauge lock registry; it is
/// cheap to clone and safe to share between concurrent callers.
#[derive(Clone)]
pub struct IngestionEngine {
  store: VigilStore,
  locks: GaugeLocks,
}

impl IngestionEngine {
  pub fn new(store: VigilStore) -> Self {
    Self { store, locks: GaugeLocks::new() }
  }

  pub fn store(&self) -> &VigilStore {
    &self.store
  }

  /// Ingest a batch of operations, stopping at the first non-OK outcome.
  pub async fn treat_data(
    &self,
    batch: &OperationBatch,
  ) -> Result<Vec<OperationOutcome>> {
    let mut outcomes = Vec::with_capacity(batch.operations.len());
    for operation in &batch.operations {
      let Operation::Insert(op) = operation;
      let outcome = self.ingest_insert(op).await?;
      let failed = outcome.status != ProcessingStatus::Ok;
      outcomes.push(outcome);
      if failed {
        break;
      }
    }
    Ok(outcomes)
  }

  async fn ingest_insert(
    &self,
    op: &InsertOperation,
  ) -> Result<OperationOutcome> {
    let dim = registry::get_or_create_dim_signature(
      &self.store,
      &op.dim_signature.name,
      &op.dim_signature.exec,
    )
    .await?;

    let source = match ledger::register_source(
      &self.store,
      dim.dim_signature_id,
      op,
    )
    .await?
    {
      SourceRegistration::AlreadyIngested(existing) => {
        // Terminal and harmless: prior data stays, nothing is rolled back.
        tracing::warn!(source = %existing.name, "source already ingested");
        self
          .store
          .insert_source_status(
            existing.source_id,
            ProcessingStatus::SourceAlreadyIngested,
            Utc::now(),
          )
          .await?;
        return Ok(OperationOutcome {
          source: existing.name,
          status: ProcessingStatus::SourceAlreadyIngested,
        });
      }
      SourceRegistration::Ready(source) => source,
    };

    self
      .store
      .insert_source_status(
        source.source_id,
        ProcessingStatus::IngestionStarted,
        Utc::now(),
      )
      .await?;

    if let Err(fault) = ledger::validate_validity(op) {
      return self.fail(&source, fault, op).await;
    }

    let mut ctx = IngestContext::new(dim, source.clone());
    registry::register_references(&self.store, &mut ctx, op).await?;

    let staged = match writer::stage(&mut ctx, op, Utc::now()) {
      Ok(staged) => staged,
      Err(fault) => return self.fail(&source, fault, op).await,
    };

    if let Err(e) = self.store.apply_staged(staged).await {
      // The bulk apply rolled itself back; a constraint violation here means
      // the link graph named rows that do not exist or collide.
      if e.is_constraint_violation() {
        return self.fail(&source, Fault::LinksInconsistency, op).await;
      }
      return Err(e.into());
    }

    resolver::resolve_operation(&self.store, &self.locks, &ctx).await?;

    ledger::finalize_ok(&self.store, &source).await?;
    tracing::info!(
      source = %source.name,
      events = op.events.len(),
      annotations = op.annotations.len(),
      "operation ingested"
    );
    Ok(OperationOutcome {
      source: source.name.clone(),
      status: ProcessingStatus::Ok,
    })
  }

  async fn fail(
    &self,
    source: &Source,
    fault: Fault,
    op: &InsertOperation,
  ) -> Result<OperationOutcome> {
    tracing::warn!(
      source = %source.name,
      status = %fault.status(),
      "operation failed"
    );
    ledger::record_failure(&self.store, source.source_id, &fault, op).await?;
    Ok(OperationOutcome {
      source: source.name.clone(),
      status: fault.status(),
    })
  }
}
