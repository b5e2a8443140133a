//! The Vigil ingestion engine.
//!
//! `treat_data` drives one operations batch through the pipeline:
//! source ledger → reference registry → event/annotation writer →
//! deprecation resolver → finalisation. Domain faults abort and roll back
//! the current operation only and come back as per-operation outcomes; hard
//! store failures propagate as errors.

pub mod context;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod segments;
pub mod writer;

pub use error::{Error, Result};
pub use orchestrator::{IngestionEngine, OperationOutcome};
