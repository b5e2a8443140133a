//! Error type for `vigil-engine`.
//!
//! Only hard failures travel this channel — storage errors and corrupt
//! persisted state. Business failures are [`vigil_core::Fault`] values,
//! recorded as ledger statuses and returned as operation outcomes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[from] vigil_store_sqlite::Error),

  #[error("core error: {0}")]
  Core(#[from] vigil_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
