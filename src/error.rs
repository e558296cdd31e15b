//! Error types for the storage and concurrency engine.

use thiserror::Error;

use crate::types::TxKey;

pub type Result<T> = std::result::Result<T, RayError>;

#[derive(Error, Debug)]
pub enum RayError {
  /// A checksum, offset, or structural check failed while reading a
  /// snapshot or WAL record.
  #[error("integrity error: {0}")]
  Integrity(String),

  /// A committing transaction's write set intersected a concurrently
  /// committed transaction's write set (first-committer-wins).
  #[error("conflict on txn {txid}: {keys:?}")]
  Conflict { txid: u64, keys: Vec<TxKey> },

  /// A file did not parse as the expected on-disk format.
  #[error("format error: {0}")]
  Format(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// An internal invariant the engine relies on was violated; indicates a
  /// bug rather than bad input.
  #[error("invariant violation: {0}")]
  InvariantViolation(String),

  /// The WAL region is full and a checkpoint could not make room in time.
  #[error("WAL buffer full")]
  WalBufferFull,

  #[error("database is read-only")]
  ReadOnly,

  #[error("a transaction is already active on this thread")]
  TransactionInProgress,

  #[error("no active transaction")]
  NoTransaction,

  #[error("internal error: {0}")]
  Internal(String),

  #[error("invalid path: {0}")]
  InvalidPath(String),

  #[error("invalid snapshot: {0}")]
  InvalidSnapshot(String),

  #[error("unknown name: {0}")]
  NotFound(String),
}

impl RayError {
  pub fn integrity(msg: impl Into<String>) -> Self {
    Self::Integrity(msg.into())
  }

  pub fn format(msg: impl Into<String>) -> Self {
    Self::Format(msg.into())
  }
}
