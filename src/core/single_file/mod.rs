//! Single-file database container (`.raydb`).
//!
//! Layout: `[Header (1 page)] [WAL region 0] [WAL region 1] [Snapshot pages...]`.
//! See `core::pager` for page-level I/O and `DbHeaderV1` in `types` for the
//! exact header layout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::core::pager::FilePager;
use crate::core::snapshot::reader::SnapshotData;
use crate::core::wal::buffer::WalBuffer;
use crate::mvcc::MvccManager;
use crate::types::*;

pub mod compactor;
pub mod iter;
pub mod open;
pub mod read;
pub mod recovery;
pub mod transaction;
pub mod write;

pub use compactor::{SingleFileOptimizeOptions, VacuumOptions};
pub use iter::{FullEdge, NodeIterator};
pub use open::{close_single_file, open_single_file, SingleFileOpenOptions};
pub use transaction::SingleFileTxGuard;

/// Per-thread transaction state for a single-file database.
#[derive(Debug, Clone)]
pub struct SingleFileTxState {
  pub txid: TxId,
  pub read_only: bool,
  pub snapshot_ts: Timestamp,
  pub pending: DeltaState,
  pub bulk_load: bool,
  pub pending_wal: Vec<u8>,
}

impl SingleFileTxState {
  pub fn new(txid: TxId, read_only: bool, snapshot_ts: Timestamp, bulk_load: bool) -> Self {
    Self {
      txid,
      read_only,
      snapshot_ts,
      pending: DeltaState::new(),
      bulk_load,
      pending_wal: Vec::new(),
    }
  }
}

/// Write-sync policy, applied to the header + WAL region after a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
  /// fsync header and WAL on every commit.
  Full,
  /// fsync only periodically / on checkpoint.
  Normal,
  /// Never fsync explicitly (rely on OS writeback); fastest, least durable.
  Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointStatus {
  Idle,
  Running,
  Completing,
}

#[derive(Debug, Default)]
pub(crate) struct GroupCommitState {
  pub next_seq: u64,
  pub flushed_seq: u64,
  pub flushing: bool,
  pub last_error_seq: u64,
  pub last_error: Option<String>,
}

/// Single-file database handle. All interior state is behind `parking_lot`
/// locks so the handle itself can be shared as `Arc<SingleFileDB>` across
/// threads without an outer mutex.
pub struct SingleFileDB {
  pub(crate) path: PathBuf,
  pub(crate) read_only: bool,
  pub(crate) pager: Mutex<FilePager>,
  pub(crate) header: RwLock<DbHeaderV1>,
  pub(crate) wal_buffer: Mutex<WalBuffer>,
  pub(crate) snapshot: RwLock<Option<SnapshotData>>,
  pub(crate) delta: RwLock<DeltaState>,

  pub(crate) next_node_id: AtomicU64,
  pub(crate) next_label_id: AtomicU32,
  pub(crate) next_etype_id: AtomicU32,
  pub(crate) next_propkey_id: AtomicU32,
  pub(crate) next_tx_id: AtomicU64,

  pub(crate) current_tx: Mutex<HashMap<ThreadId, Arc<Mutex<SingleFileTxState>>>>,
  pub(crate) active_writers: AtomicUsize,
  pub(crate) commit_lock: Mutex<()>,

  pub(crate) group_commit_state: Mutex<GroupCommitState>,
  pub(crate) group_commit_cv: Condvar,
  pub(crate) group_commit_enabled: bool,

  pub(crate) mvcc: Option<Arc<MvccManager>>,

  pub(crate) schema: RwLock<SchemaTables>,

  pub(crate) auto_checkpoint: bool,
  pub(crate) checkpoint_threshold: f64,
  pub(crate) background_checkpoint: bool,
  pub(crate) checkpoint_status: Mutex<CheckpointStatus>,

  pub(crate) sync_mode: SyncMode,
}

impl SingleFileDB {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn is_read_only(&self) -> bool {
    self.read_only
  }

  pub fn alloc_node_id(&self) -> NodeId {
    self.next_node_id.fetch_add(1, Ordering::SeqCst)
  }

  pub fn reserve_node_id(&self, node_id: NodeId) {
    let desired = node_id.saturating_add(1);
    loop {
      let current = self.next_node_id.load(Ordering::SeqCst);
      if current >= desired {
        break;
      }
      if self
        .next_node_id
        .compare_exchange(current, desired, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
      {
        break;
      }
    }
  }

  pub fn alloc_label_id(&self) -> LabelId {
    self.next_label_id.fetch_add(1, Ordering::SeqCst)
  }

  pub fn alloc_etype_id(&self) -> ETypeId {
    self.next_etype_id.fetch_add(1, Ordering::SeqCst)
  }

  pub fn alloc_propkey_id(&self) -> PropKeyId {
    self.next_propkey_id.fetch_add(1, Ordering::SeqCst)
  }

  pub fn alloc_tx_id(&self) -> TxId {
    self.next_tx_id.fetch_add(1, Ordering::SeqCst)
  }

  pub fn mvcc_enabled(&self) -> bool {
    self.mvcc.is_some()
  }

  // ==========================================================================
  // Schema Lookups
  // ==========================================================================

  pub fn get_label_id(&self, name: &str) -> Option<LabelId> {
    self.schema.read().label_names.get(name).copied()
  }

  pub fn get_label_name(&self, id: LabelId) -> Option<String> {
    self.schema.read().label_ids.get(&id).cloned()
  }

  pub fn get_etype_id(&self, name: &str) -> Option<ETypeId> {
    self.schema.read().etype_names.get(name).copied()
  }

  pub fn get_etype_name(&self, id: ETypeId) -> Option<String> {
    self.schema.read().etype_ids.get(&id).cloned()
  }

  pub fn get_propkey_id(&self, name: &str) -> Option<PropKeyId> {
    self.schema.read().propkey_names.get(name).copied()
  }

  pub fn get_propkey_name(&self, id: PropKeyId) -> Option<String> {
    self.schema.read().propkey_ids.get(&id).cloned()
  }

  // ==========================================================================
  // Cache (no-op: single-file containers serve reads straight off the mmap'd
  // snapshot plus in-memory delta, with nothing else worth caching)
  // ==========================================================================

  pub(crate) fn cache_invalidate_node(&self, _node_id: NodeId) {}

  pub(crate) fn cache_invalidate_edge(&self, _src: NodeId, _etype: ETypeId, _dst: NodeId) {}

  pub(crate) fn cache_clear(&self) {}

  /// Direct (transaction-agnostic) existence check: snapshot-plus-delta only,
  /// ignoring any thread-local transaction or MVCC version chain. Used by the
  /// checker and by read-only convenience accessors.
  pub fn node_exists_db(&self, node_id: NodeId) -> bool {
    let delta = self.delta.read();
    if delta.is_node_deleted(node_id) {
      return false;
    }
    if delta.is_node_created(node_id) {
      return true;
    }
    self
      .snapshot
      .read()
      .as_ref()
      .is_some_and(|s| s.has_node(node_id))
  }

  pub fn node_exists(&self, node_id: NodeId) -> bool {
    if let Some(handle) = self.current_tx_handle() {
      let tx = handle.lock();
      if tx.pending.is_node_deleted(node_id) {
        return false;
      }
      if tx.pending.is_node_created(node_id) {
        return true;
      }
    }
    self.node_exists_db(node_id)
  }

  pub fn edge_exists(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    if let Some(handle) = self.current_tx_handle() {
      let tx = handle.lock();
      if tx.pending.is_edge_deleted(src, etype, dst) {
        return false;
      }
      if tx
        .pending
        .out_add
        .get(&src)
        .is_some_and(|v| v.iter().any(|p| p.etype == etype && p.other == dst))
      {
        return true;
      }
    }

    let delta = self.delta.read();
    if delta.is_edge_deleted(src, etype, dst) {
      return false;
    }
    if delta
      .out_add
      .get(&src)
      .is_some_and(|v| v.iter().any(|p| p.etype == etype && p.other == dst))
    {
      return true;
    }

    if let Some(snapshot) = self.snapshot.read().as_ref() {
      if let (Some(src_phys), Some(dst_phys)) = (snapshot.phys_node(src), snapshot.phys_node(dst)) {
        return snapshot.has_edge(src_phys, etype, dst_phys);
      }
    }
    false
  }
}

pub fn is_single_file_path<P: AsRef<Path>>(path: P) -> bool {
  path
    .as_ref()
    .extension()
    .map(|ext| ext == "raydb")
    .unwrap_or(false)
}

pub fn single_file_extension() -> &'static str {
  crate::constants::EXT_RAYDB
}
