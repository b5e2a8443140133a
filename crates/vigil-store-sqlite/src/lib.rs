//! SQLite backing store for the Vigil ingestion engine.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. This crate exposes storage primitives
//! only — find/insert per reference kind, bulk staged writes, resolver
//! queries and mutation batches; the algorithms that drive them live in
//! `vigil-engine`.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{
  EventWithSource, OwnedValueRow, ResolutionBatch, SourceStatus, StagedBatch,
  VigilStore,
};

#[cfg(test)]
mod tests;
