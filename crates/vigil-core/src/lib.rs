//! Core types for the Vigil temporal event/annotation store.
//!
//! This crate is deliberately free of database dependencies. It holds the
//! operations payload model, the persisted entity model, the value tree
//! codec, and the processing-status taxonomy. All other crates depend on it;
//! it depends on nothing proprietary.

pub mod error;
pub mod model;
pub mod operation;
pub mod status;
pub mod time;
pub mod values;

pub use error::{Error, Fault, Result};
