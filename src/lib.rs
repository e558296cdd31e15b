//! RayDB - an embeddable graph database storage and concurrency engine.
//!
//! # Architecture
//!
//! RayDB uses a **Snapshot + Delta + WAL** architecture:
//!
//! - **Snapshot**: immutable, memory-mapped CSR format for fast reads
//! - **Delta**: in-memory overlay for pending changes
//! - **WAL**: write-ahead log for durability and crash recovery
//!
//! # Features
//!
//! - Zero-copy reads via mmap
//! - ACID transactions with optional MVCC snapshot isolation
//! - Single-file (`.raydb`) and multi-file (manifest + snapshots/ + wal/) containers

#![deny(clippy::all)]
#![allow(dead_code)] // Allow during development

pub mod check;
pub mod constants;
pub mod core;
pub mod error;
pub mod graph;
pub mod mvcc;
pub mod types;
pub mod util;

pub use error::{RayError, Result};
pub use types::{
  DbStats, ETypeId, LabelId, MvccStats, NodeId, PropKeyId, PropValue, PropValueTag, TxId,
};
