//! Main GraphDB struct and lifecycle
//!
//! The GraphDB is the main entry point for the multi-file container format. It manages:
//! - Snapshot (immutable base data, one file per generation under `snapshots/`)
//! - Delta (uncommitted changes)
//! - WAL (write-ahead log for durability, one flat segment file under `wal/`)
//! - Transactions
//! - ID allocation

use std::fs::{self, File, OpenOptions as FsOpenOptions};
use std::io::{Seek, SeekFrom, Write};
#[cfg(target_os = "macos")]
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};

use crate::constants::*;
use crate::core::manifest::Manifest;
use crate::core::snapshot::reader::{ParseSnapshotOptions, SnapshotData};
use crate::core::snapshot::writer::{build_snapshot_to_memory, EdgeInput, NodeInput, SnapshotBuildInput};
use crate::core::single_file::recovery::get_committed_transactions;
use crate::core::wal::record::WalRecord;
use crate::error::{RayError, Result};
use crate::mvcc::MvccManager;
use crate::types::*;

// ============================================================================
// Open Options
// ============================================================================

/// Options for opening a database
#[derive(Debug, Clone)]
pub struct OpenOptions {
  /// Open in read-only mode
  pub read_only: bool,
  /// Create database if it doesn't exist
  pub create_if_missing: bool,
  /// Enable MVCC
  pub mvcc: bool,
}

impl Default for OpenOptions {
  fn default() -> Self {
    Self {
      read_only: false,
      create_if_missing: true,
      mvcc: false,
    }
  }
}

impl OpenOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn read_only(mut self, value: bool) -> Self {
    self.read_only = value;
    self
  }

  pub fn create_if_missing(mut self, value: bool) -> Self {
    self.create_if_missing = value;
    self
  }

  pub fn mvcc(mut self, value: bool) -> Self {
    self.mvcc = value;
    self
  }
}

// ============================================================================
// Transaction State
// ============================================================================

/// State of an active transaction
#[derive(Debug)]
pub struct TxState {
  pub txid: TxId,
  pub read_only: bool,
  /// WAL records accumulated in this transaction
  pub wal_records: Vec<WalRecord>,
  /// Snapshot timestamp for MVCC reads
  pub snapshot_ts: u64,
}

impl TxState {
  pub fn new(txid: TxId, read_only: bool, snapshot_ts: u64) -> Self {
    Self {
      txid,
      read_only,
      wal_records: Vec::new(),
      snapshot_ts,
    }
  }
}

// ============================================================================
// GraphDB
// ============================================================================

/// The main graph database handle (multi-file container format)
pub struct GraphDB {
  /// Database directory
  pub path: PathBuf,
  /// Read-only mode
  pub read_only: bool,
  /// Always false: this type only ever backs the multi-file container.
  pub is_single_file: bool,

  /// Manifest naming the active snapshot generation and WAL segment
  pub manifest: Option<Manifest>,
  /// Loaded snapshot data
  pub snapshot: Option<SnapshotData>,
  /// WAL segment file handle
  wal_fd: Option<File>,
  /// Current WAL write offset
  wal_offset: AtomicU64,

  /// Delta state (uncommitted changes)
  pub delta: RwLock<DeltaState>,

  /// Next node ID to allocate
  next_node_id: AtomicU64,
  /// Next label ID to allocate
  next_label_id: AtomicU32,
  /// Next edge type ID to allocate
  next_etype_id: AtomicU32,
  /// Next property key ID to allocate
  next_propkey_id: AtomicU32,
  /// Next transaction ID to allocate
  next_tx_id: AtomicU64,

  /// Current active transaction (single-writer model)
  pub current_tx: Mutex<Option<TxState>>,

  /// Label/edge-type/propkey name <-> ID tables
  schema: RwLock<SchemaTables>,

  /// MVCC bookkeeping (txid/commitTs counters, version chains, conflict
  /// detection), present only when `OpenOptions::mvcc` was set.
  pub mvcc: Option<Arc<MvccManager>>,
}

impl GraphDB {
  // ========================================================================
  // ID Allocation
  // ========================================================================

  pub fn alloc_node_id(&self) -> NodeId {
    self.next_node_id.fetch_add(1, Ordering::SeqCst)
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

  /// Keeps the plain transaction-ID counter ahead of an MVCC-assigned txid,
  /// since when MVCC is enabled the WAL txid is the MVCC manager's own.
  pub(crate) fn sync_tx_id_counter(&self, txid: TxId) {
    self.next_tx_id.fetch_max(txid.saturating_add(1), Ordering::SeqCst);
  }

  pub fn peek_next_node_id(&self) -> NodeId {
    self.next_node_id.load(Ordering::SeqCst)
  }

  // ========================================================================
  // Schema Lookups
  // ========================================================================

  /// Get or create a label ID by name. Used outside a transaction; the
  /// definition is visible immediately and not itself WAL-logged (see
  /// `graph::definitions` for the transactional, WAL-durable path).
  pub fn get_or_create_label(&self, name: &str) -> LabelId {
    if let Some(id) = self.get_label_id(name) {
      return id;
    }
    let id = self.alloc_label_id();
    self.register_label(id, name);
    id
  }

  pub fn get_label_id(&self, name: &str) -> Option<LabelId> {
    self.schema.read().label_names.get(name).copied()
  }

  pub fn get_label_name(&self, id: LabelId) -> Option<String> {
    self.schema.read().label_ids.get(&id).cloned()
  }

  pub fn get_or_create_etype(&self, name: &str) -> ETypeId {
    if let Some(id) = self.get_etype_id(name) {
      return id;
    }
    let id = self.alloc_etype_id();
    self.register_etype(id, name);
    id
  }

  pub fn get_etype_id(&self, name: &str) -> Option<ETypeId> {
    self.schema.read().etype_names.get(name).copied()
  }

  pub fn get_etype_name(&self, id: ETypeId) -> Option<String> {
    self.schema.read().etype_ids.get(&id).cloned()
  }

  pub fn get_or_create_propkey(&self, name: &str) -> PropKeyId {
    if let Some(id) = self.get_propkey_id(name) {
      return id;
    }
    let id = self.alloc_propkey_id();
    self.register_propkey(id, name);
    id
  }

  pub fn get_propkey_id(&self, name: &str) -> Option<PropKeyId> {
    self.schema.read().propkey_names.get(name).copied()
  }

  pub fn get_propkey_name(&self, id: PropKeyId) -> Option<String> {
    self.schema.read().propkey_ids.get(&id).cloned()
  }

  /// Records a label definition in the live schema tables, making it visible
  /// to `get_label_id`/`get_label_name` within this session without waiting
  /// for a reopen. Called both by `get_or_create_label` and by
  /// `graph::definitions::define_label` once its WAL record is durable.
  pub(crate) fn register_label(&self, id: LabelId, name: &str) {
    self.schema.write().define_label(id, name);
  }

  pub(crate) fn register_etype(&self, id: ETypeId, name: &str) {
    self.schema.write().define_etype(id, name);
  }

  pub(crate) fn register_propkey(&self, id: PropKeyId, name: &str) {
    self.schema.write().define_propkey(id, name);
  }

  // ========================================================================
  // WAL Operations
  // ========================================================================

  pub fn append_wal_record(&self, record: WalRecord) -> Result<()> {
    let mut tx_guard = self.current_tx.lock();
    if let Some(ref mut tx) = *tx_guard {
      if tx.read_only {
        return Err(RayError::ReadOnly);
      }
      tx.wal_records.push(record);
      Ok(())
    } else {
      Err(RayError::NoTransaction)
    }
  }

  /// Appends records to the WAL segment file and syncs before returning.
  pub fn flush_wal(&self, records: &[WalRecord]) -> Result<()> {
    let Some(ref fd) = self.wal_fd else {
      return Err(RayError::Internal("WAL not initialized".to_string()));
    };

    let mut fd_clone = fd.try_clone()?;
    let offset = self.wal_offset.load(Ordering::SeqCst);
    fd_clone.seek(SeekFrom::Start(offset))?;

    let mut new_offset = offset;
    for record in records {
      let bytes = record.encode();
      fd_clone.write_all(&bytes)?;
      new_offset += bytes.len() as u64;
    }

    // On macOS, a plain fsync() is ~190x cheaper than F_FULLFSYNC and matches
    // what most embedded stores ship by default; callers who need the
    // platter-durability guarantee should fsync the file themselves.
    #[cfg(target_os = "macos")]
    {
      let ret = unsafe { libc::fsync(fd_clone.as_raw_fd()) };
      if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
      }
    }
    #[cfg(not(target_os = "macos"))]
    {
      fd_clone.sync_all()?;
    }

    self.wal_offset.store(new_offset, Ordering::SeqCst);
    Ok(())
  }

  // ========================================================================
  // Compaction / Optimize
  // ========================================================================

  /// Merges the current snapshot and delta into a fresh snapshot generation,
  /// points the manifest at it, and starts a new (empty) WAL segment.
  pub fn optimize(&mut self) -> Result<()> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    if self.current_tx.lock().is_some() {
      return Err(RayError::TransactionInProgress);
    }

    let manifest = self
      .manifest
      .clone()
      .ok_or_else(|| RayError::Internal("no manifest for multi-file database".to_string()))?;

    let (nodes, edges, labels, etypes, propkeys) = self.collect_graph_data();
    let new_gen = manifest.active_snapshot_gen + 1;

    let snapshot_buffer = build_snapshot_to_memory(SnapshotBuildInput {
      generation: new_gen,
      created_unix_ns: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0),
      nodes,
      edges,
      labels,
      etypes,
      propkeys,
    })?;

    let snapshot_path = self.path.join(SNAPSHOTS_DIR).join(snapshot_filename(new_gen));
    fs::write(&snapshot_path, &snapshot_buffer)?;
    {
      let f = File::open(&snapshot_path)?;
      f.sync_all()?;
    }

    let new_manifest = Manifest {
      active_snapshot_gen: new_gen,
      prev_snapshot_gen: manifest.active_snapshot_gen,
      active_wal_seg: manifest.active_wal_seg + 1,
    };
    new_manifest.write_atomic(&self.path)?;
    self.manifest = Some(new_manifest);

    self.delta.write().clear();

    let file = File::open(&snapshot_path)?;
    let mmap = Arc::new(unsafe { Mmap::map(&file)? });
    let snapshot_data = SnapshotData::parse_at_offset(mmap, 0, &ParseSnapshotOptions::default())?;
    self.snapshot = Some(snapshot_data);

    let wal_path = self.path.join(WAL_DIR).join(wal_filename(new_manifest.active_wal_seg));
    let wal_fd = FsOpenOptions::new().create(true).read(true).write(true).open(&wal_path)?;
    self.wal_fd = Some(wal_fd);
    self.wal_offset.store(0, Ordering::SeqCst);

    if let Some(old_gen) = Some(manifest.active_snapshot_gen).filter(|&g| g > 0) {
      let old_path = self.path.join(SNAPSHOTS_DIR).join(snapshot_filename(old_gen));
      let _ = fs::remove_file(old_path);
    }

    Ok(())
  }

  /// Gathers every live node and edge (snapshot + delta) into the flat
  /// input shape `build_snapshot_to_memory` expects.
  fn collect_graph_data(
    &self,
  ) -> (
    Vec<NodeInput>,
    Vec<EdgeInput>,
    Vec<(LabelId, String)>,
    Vec<(ETypeId, String)>,
    Vec<(PropKeyId, String)>,
  ) {
    use super::edges::{get_edge_props_db, get_neighbors_out_db};
    use super::nodes::get_node_prop_db;

    let delta = self.delta.read();
    let mut node_ids: Vec<NodeId> = Vec::new();
    if let Some(ref snapshot) = self.snapshot {
      for phys in 0..snapshot.num_nodes() as u32 {
        if let Some(node_id) = snapshot.get_node_id(phys) {
          if !delta.is_node_deleted(node_id) {
            node_ids.push(node_id);
          }
        }
      }
    }
    node_ids.extend(delta.created_nodes.keys().copied());

    let schema = self.schema.read();
    let propkey_ids: Vec<PropKeyId> = schema.propkey_ids.keys().copied().collect();
    let etype_ids: Vec<ETypeId> = schema.etype_ids.keys().copied().collect();
    let labels: Vec<(LabelId, String)> = schema.label_ids.iter().map(|(&id, n)| (id, n.clone())).collect();
    let etypes: Vec<(ETypeId, String)> = schema.etype_ids.iter().map(|(&id, n)| (id, n.clone())).collect();
    let propkeys: Vec<(PropKeyId, String)> = schema.propkey_ids.iter().map(|(&id, n)| (id, n.clone())).collect();
    drop(schema);

    let nodes = node_ids
      .iter()
      .map(|&node_id| {
        let key = self
          .snapshot
          .as_ref()
          .and_then(|s| s.node_key(node_id))
          .map(|k| k.to_string())
          .or_else(|| delta.created_nodes.get(&node_id).and_then(|n| n.key.clone()));

        let mut node_labels: std::collections::HashSet<LabelId> = self
          .snapshot
          .as_ref()
          .and_then(|s| s.phys_node(node_id))
          .and_then(|phys| self.snapshot.as_ref().unwrap().node_labels(phys))
          .map(|v| v.into_iter().collect())
          .unwrap_or_default();
        if let Some(nd) = delta.node_delta(node_id) {
          if let Some(ref removed) = nd.labels_deleted {
            for l in removed {
              node_labels.remove(l);
            }
          }
          if let Some(ref added) = nd.labels {
            node_labels.extend(added.iter().copied());
          }
        }

        let props: Vec<(PropKeyId, PropValue)> = propkey_ids
          .iter()
          .filter_map(|&key_id| get_node_prop_db(self, node_id, key_id).map(|v| (key_id, v)))
          .collect();
        NodeInput {
          node_id,
          key,
          labels: node_labels.into_iter().collect(),
          props,
        }
      })
      .collect();
    drop(delta);

    let mut edges = Vec::new();
    for &src in &node_ids {
      for &etype in &etype_ids {
        for dst in get_neighbors_out_db(self, src, Some(etype)) {
          let props = get_edge_props_db(self, src, etype, dst)
            .map(|m| m.into_iter().collect())
            .unwrap_or_default();
          edges.push(EdgeInput { src, etype, dst, props });
        }
      }
    }
    let _ = count_edges_out;

    (nodes, edges, labels, etypes, propkeys)
  }

  /// Validate the loaded snapshot's structural invariants (CSR offsets,
  /// edge reciprocity, key-index ordering, string table bounds).
  ///
  /// An empty database with no snapshot generation yet is trivially valid.
  pub fn check(&self) -> CheckResult {
    match self.snapshot.as_ref() {
      Some(snapshot) => crate::check::check_snapshot(snapshot),
      None => CheckResult {
        valid: true,
        errors: Vec::new(),
        warnings: Vec::new(),
      },
    }
  }
}

// ============================================================================
// Opening and Closing
// ============================================================================

/// Open a graph database (multi-file format)
pub fn open_graph_db<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<GraphDB> {
  let path = path.as_ref();

  let manifest_path = path.join("manifest.gdm");

  if !manifest_path.exists() {
    if !options.create_if_missing {
      return Err(RayError::InvalidPath(format!(
        "Database does not exist at {}",
        path.display()
      )));
    }
    fs::create_dir_all(path)?;
    fs::create_dir_all(path.join(SNAPSHOTS_DIR))?;
    fs::create_dir_all(path.join(WAL_DIR))?;
  }

  let manifest = if manifest_path.exists() {
    Manifest::read_from(path)?
  } else {
    if options.read_only {
      return Err(RayError::ReadOnly);
    }
    let m = Manifest::new();
    m.write_atomic(path)?;
    m
  };

  let snapshot: Option<SnapshotData> = if manifest.active_snapshot_gen > 0 {
    let snapshot_path = path.join(SNAPSHOTS_DIR).join(snapshot_filename(manifest.active_snapshot_gen));
    match File::open(&snapshot_path).and_then(|f| unsafe { Mmap::map(&f) }.map_err(Into::into)) {
      Ok(mmap) => match SnapshotData::parse_at_offset(Arc::new(mmap), 0, &ParseSnapshotOptions::default()) {
        Ok(snap) => Some(snap),
        Err(e) => {
          eprintln!("Warning: Failed to parse snapshot {}: {e}", snapshot_path.display());
          None
        }
      },
      Err(e) => {
        eprintln!("Warning: Failed to open snapshot {}: {e}", snapshot_path.display());
        None
      }
    }
  } else {
    None
  };

  let (mut next_node_id, mut next_label_id, mut next_etype_id, mut next_propkey_id) =
    if let Some(ref snap) = snapshot {
      (
        snap.header.max_node_id + 1,
        snap.header.num_labels as u32 + 1,
        snap.header.num_etypes as u32 + 1,
        snap.header.num_propkeys as u32 + 1,
      )
    } else {
      (
        INITIAL_NODE_ID,
        INITIAL_LABEL_ID,
        INITIAL_ETYPE_ID,
        INITIAL_PROPKEY_ID,
      )
    };

  let wal_dir = path.join(WAL_DIR);
  if !options.read_only && !wal_dir.exists() {
    fs::create_dir_all(&wal_dir)?;
  }
  let wal_path = wal_dir.join(wal_filename(manifest.active_wal_seg));

  let (wal_fd, wal_offset) = if !options.read_only {
    let fd = FsOpenOptions::new().create(true).read(true).write(true).open(&wal_path)?;
    let offset = fd.metadata()?.len();
    (Some(fd), offset)
  } else if wal_path.exists() {
    let fd = FsOpenOptions::new().read(true).open(&wal_path)?;
    let offset = fd.metadata()?.len();
    (Some(fd), offset)
  } else {
    (None, 0)
  };

  let mut next_tx_id = INITIAL_TX_ID;
  let mut delta = DeltaState::new();
  let mut schema = SchemaTables::default();
  let mvcc = if options.mvcc { Some(Arc::new(MvccManager::new())) } else { None };

  if let Some(ref snap) = snapshot {
    for i in 1..=snap.header.num_labels as u32 {
      if let Some(name) = snap.get_label_name(i) {
        schema.define_label(i, name);
      }
    }
    for i in 1..=snap.header.num_etypes as u32 {
      if let Some(name) = snap.get_etype_name(i) {
        schema.define_etype(i, name);
      }
    }
    for i in 1..=snap.header.num_propkeys as u32 {
      if let Some(name) = snap.get_propkey_name(i) {
        schema.define_propkey(i, name);
      }
    }
  }

  if wal_path.exists() {
    let wal_bytes = fs::read(&wal_path)?;
    let mut wal_records = Vec::new();
    let mut offset = 0usize;
    while offset < wal_bytes.len() {
      match WalRecord::decode(&wal_bytes[offset..])? {
        Some((record, consumed)) => {
          wal_records.push(record);
          offset += consumed;
        }
        None => break,
      }
    }

    for (txid, records) in get_committed_transactions(&wal_records) {
      if txid >= next_tx_id {
        next_tx_id = txid + 1;
      }
      for record in &records {
        crate::core::single_file::recovery::replay_wal_record(
          record,
          &mut delta,
          &mut next_node_id,
          &mut next_label_id,
          &mut next_etype_id,
          &mut next_propkey_id,
          &mut schema,
        )?;
      }
    }
  }

  Ok(GraphDB {
    path: path.to_path_buf(),
    read_only: options.read_only,
    is_single_file: false,
    manifest: Some(manifest),
    snapshot,
    wal_fd,
    wal_offset: AtomicU64::new(wal_offset),
    delta: RwLock::new(delta),
    next_node_id: AtomicU64::new(next_node_id),
    next_label_id: AtomicU32::new(next_label_id),
    next_etype_id: AtomicU32::new(next_etype_id),
    next_propkey_id: AtomicU32::new(next_propkey_id),
    next_tx_id: AtomicU64::new(next_tx_id),
    current_tx: Mutex::new(None),
    schema: RwLock::new(schema),
    mvcc,
  })
}

/// Close the database
pub fn close_graph_db(db: GraphDB) -> Result<()> {
  if let Some(fd) = db.wal_fd {
    fd.sync_all()?;
  }
  Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn test_open_new_database() {
    let temp_dir = tempdir().unwrap();
    let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

    assert!(!db.read_only);
    assert!(!db.is_single_file);
    assert!(db.manifest.is_some());

    close_graph_db(db).unwrap();
  }

  #[test]
  fn test_id_allocation() {
    let temp_dir = tempdir().unwrap();
    let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

    let id1 = db.alloc_node_id();
    let id2 = db.alloc_node_id();
    assert_eq!(id2, id1 + 1);

    let label1 = db.alloc_label_id();
    let label2 = db.alloc_label_id();
    assert_eq!(label2, label1 + 1);

    close_graph_db(db).unwrap();
  }

  #[test]
  fn test_schema_lookup() {
    let temp_dir = tempdir().unwrap();
    let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

    let label_id = db.get_or_create_label("Person");
    assert!(label_id >= INITIAL_LABEL_ID);

    let label_id2 = db.get_or_create_label("Person");
    assert_eq!(label_id, label_id2);

    assert_eq!(db.get_label_id("Person"), Some(label_id));
    assert_eq!(db.get_label_name(label_id), Some("Person".to_string()));

    assert_eq!(db.get_label_id("Unknown"), None);

    close_graph_db(db).unwrap();
  }

  #[test]
  fn test_reopen_database() {
    let temp_dir = tempdir().unwrap();

    {
      let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();
      let _label_id = db.get_or_create_label("Person");
      close_graph_db(db).unwrap();
    }

    let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();
    // get_or_create_label above never went through the WAL, so it does not
    // survive reopen; graph::definitions::define_label does.
    close_graph_db(db).unwrap();
  }

  #[test]
  fn test_wal_replay_on_reopen() {
    use crate::graph::edges::add_edge;
    use crate::graph::nodes::{create_node, NodeOpts};
    use crate::graph::tx::{begin_tx, commit};

    let temp_dir = tempdir().unwrap();
    let mut node_ids = Vec::new();

    {
      let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

      let mut tx = begin_tx(&db).unwrap();
      let node1 = create_node(&mut tx, NodeOpts::new().with_key("alice")).unwrap();
      let node2 = create_node(&mut tx, NodeOpts::new().with_key("bob")).unwrap();
      add_edge(&mut tx, node1, 1, node2).unwrap();
      commit(&mut tx).unwrap();

      node_ids.push(node1);
      node_ids.push(node2);

      close_graph_db(db).unwrap();
    }

    {
      let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

      let delta = db.delta.read();
      assert!(delta.is_node_created(node_ids[0]), "Node 1 should be in delta after WAL replay");
      assert!(delta.is_node_created(node_ids[1]), "Node 2 should be in delta after WAL replay");
      assert!(
        delta.is_edge_added(node_ids[0], 1, node_ids[1]),
        "Edge should be in delta after WAL replay"
      );

      assert_eq!(delta.get_node_by_key("alice"), Some(node_ids[0]));
      assert_eq!(delta.get_node_by_key("bob"), Some(node_ids[1]));

      drop(delta);
      close_graph_db(db).unwrap();
    }
  }

  #[test]
  fn test_wal_replay_definitions() {
    use crate::graph::definitions::{define_etype, define_label, define_propkey};
    use crate::graph::tx::{begin_tx, commit};

    let temp_dir = tempdir().unwrap();

    {
      let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

      let mut tx = begin_tx(&db).unwrap();
      define_label(&mut tx, "Person").unwrap();
      define_etype(&mut tx, "KNOWS").unwrap();
      define_propkey(&mut tx, "name").unwrap();
      commit(&mut tx).unwrap();

      close_graph_db(db).unwrap();
    }

    {
      let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

      assert!(db.get_label_id("Person").is_some(), "Label should exist after WAL replay");
      assert!(db.get_etype_id("KNOWS").is_some(), "Etype should exist after WAL replay");
      assert!(db.get_propkey_id("name").is_some(), "Propkey should exist after WAL replay");

      close_graph_db(db).unwrap();
    }
  }

  #[test]
  fn test_wal_replay_node_properties() {
    use crate::graph::nodes::{create_node, get_node_prop, set_node_prop, NodeOpts};
    use crate::graph::tx::{begin_read_tx, begin_tx, commit};

    let temp_dir = tempdir().unwrap();
    let mut node_id = 0;
    let propkey_id = 1;

    {
      let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

      let mut tx = begin_tx(&db).unwrap();
      node_id = create_node(&mut tx, NodeOpts::new()).unwrap();
      set_node_prop(&mut tx, node_id, propkey_id, PropValue::String("test_value".to_string())).unwrap();
      commit(&mut tx).unwrap();

      close_graph_db(db).unwrap();
    }

    {
      let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

      let tx = begin_read_tx(&db).unwrap();
      let prop = get_node_prop(&tx, node_id, propkey_id);
      assert_eq!(prop, Some(PropValue::String("test_value".to_string())));

      close_graph_db(db).unwrap();
    }
  }
}
