//! Core identifier and value types shared across the storage engine.

use std::collections::HashMap;

use bitflags::bitflags;
use hashbrown::{HashMap as FastMap, HashSet as FastSet};

// ============================================================================
// Identifiers
// ============================================================================

/// Monotonically assigned node identity. Never reused.
pub type NodeId = u64;
/// Monotonically assigned label dictionary id.
pub type LabelId = u32;
/// Monotonically assigned edge-type dictionary id.
pub type ETypeId = u32;
/// Monotonically assigned property-key dictionary id.
pub type PropKeyId = u32;
/// String-table index within a snapshot.
pub type StringId = u32;
/// Physical (dense) node index within a snapshot's CSR arrays.
pub type PhysNode = u32;
/// Transaction identity, assigned from a monotonic per-database counter.
pub type TxId = u64;
/// MVCC commit timestamp; also used as a transaction's snapshot `startTs`.
pub type Timestamp = u64;

// ============================================================================
// Property values
// ============================================================================

/// Closed sum type for property values, as stored on disk in a 16-byte
/// `{tag, payload}` record (§3, §9 of the property model).
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
  Null,
  Bool(bool),
  I64(i64),
  F64(f64),
  String(String),
}

/// On-disk tag byte for [`PropValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PropValueTag {
  Null = 0,
  Bool = 1,
  I64 = 2,
  F64 = 3,
  String = 4,
}

impl PropValueTag {
  pub fn from_u8(v: u8) -> Option<Self> {
    match v {
      0 => Some(Self::Null),
      1 => Some(Self::Bool),
      2 => Some(Self::I64),
      3 => Some(Self::F64),
      4 => Some(Self::String),
      _ => None,
    }
  }
}

/// Fixed on-disk size of a property value record: `{tag:u8, pad[7], payload:u64}`.
pub const PROP_VALUE_DISK_SIZE: usize = 16;

/// Fixed on-disk size of a key-index entry: `{hash64:u64, stringId:u32, reserved:u32, nodeId:u64}`.
pub const KEY_INDEX_ENTRY_SIZE: usize = 24;

// ============================================================================
// Section identifiers (C1 snapshot)
// ============================================================================

/// The 23 fixed section ids that appear, in order, in a snapshot's section table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SectionId {
  PhysToNodeId = 0,
  NodeIdToPhys = 1,
  OutOffsets = 2,
  OutDst = 3,
  OutEtype = 4,
  InOffsets = 5,
  InSrc = 6,
  InEtype = 7,
  InOutIndex = 8,
  StringOffsets = 9,
  StringBytes = 10,
  LabelStringIds = 11,
  EtypeStringIds = 12,
  PropkeyStringIds = 13,
  NodeKeyString = 14,
  KeyEntries = 15,
  KeyBuckets = 16,
  NodeLabelOffsets = 17,
  NodeLabelIds = 18,
  NodePropOffsets = 19,
  NodePropKeys = 20,
  NodePropVals = 21,
  EdgePropOffsets = 22,
}

impl SectionId {
  pub const COUNT: usize = 23;

  pub fn from_u32(v: u32) -> Option<Self> {
    use SectionId::*;
    Some(match v {
      0 => PhysToNodeId,
      1 => NodeIdToPhys,
      2 => OutOffsets,
      3 => OutDst,
      4 => OutEtype,
      5 => InOffsets,
      6 => InSrc,
      7 => InEtype,
      8 => InOutIndex,
      9 => StringOffsets,
      10 => StringBytes,
      11 => LabelStringIds,
      12 => EtypeStringIds,
      13 => PropkeyStringIds,
      14 => NodeKeyString,
      15 => KeyEntries,
      16 => KeyBuckets,
      17 => NodeLabelOffsets,
      18 => NodeLabelIds,
      19 => NodePropOffsets,
      20 => NodePropKeys,
      21 => NodePropVals,
      22 => EdgePropOffsets,
      _ => return None,
    })
  }
}

// Edge properties share the node-prop-vals section layout but need their own
// keys/vals arrays; tracked via two extra logical sections layered onto the
// fixed 23-entry table (EdgePropKeys / EdgePropVals follow EdgePropOffsets in
// byte layout but are addressed as the remaining reserved slots the snapshot
// writer allocates contiguously). See core::snapshot for the exact mapping.
pub const EDGE_PROP_KEYS_SLOT: usize = 23;
pub const EDGE_PROP_VALS_SLOT: usize = 24;

bitflags! {
  /// Snapshot header flags.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct SnapshotFlags: u32 {
    const HAS_IN_EDGES     = 1 << 0;
    const HAS_PROPERTIES   = 1 << 1;
    const HAS_KEY_BUCKETS  = 1 << 2;
    const HAS_NODE_LABELS  = 1 << 3;
  }
}

// ============================================================================
// WAL record types (C3)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
  Begin = 1,
  Commit = 2,
  Rollback = 3,
  CreateNode = 10,
  DeleteNode = 11,
  AddEdge = 20,
  DeleteEdge = 21,
  DefineLabel = 30,
  AddNodeLabel = 31,
  RemoveNodeLabel = 32,
  DefineEtype = 40,
  DefinePropkey = 50,
  SetNodeProp = 51,
  DelNodeProp = 52,
  SetEdgeProp = 53,
  DelEdgeProp = 54,
}

impl WalRecordType {
  pub fn from_u8(v: u8) -> Option<Self> {
    use WalRecordType::*;
    Some(match v {
      1 => Begin,
      2 => Commit,
      3 => Rollback,
      10 => CreateNode,
      11 => DeleteNode,
      20 => AddEdge,
      21 => DeleteEdge,
      30 => DefineLabel,
      31 => AddNodeLabel,
      32 => RemoveNodeLabel,
      40 => DefineEtype,
      50 => DefinePropkey,
      51 => SetNodeProp,
      52 => DelNodeProp,
      53 => SetEdgeProp,
      54 => DelEdgeProp,
      _ => return None,
    })
  }
}

// ============================================================================
// Delta overlay (C2)
// ============================================================================

/// Sorted, deduplicated edge patch: the other endpoint of an edge plus its etype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EdgePatch {
  pub etype: ETypeId,
  pub other: NodeId,
}

/// Edge identity used as a key into `edgeProps` and MVCC edge version chains.
pub type EdgeKey = (NodeId, ETypeId, NodeId);

/// Per-node overlay used by both `createdNodes` and `modifiedNodes`.
///
/// `labels` / `labels_deleted` and `props` are `None` until first touched so
/// that an untouched node has zero allocation cost.
#[derive(Debug, Clone, Default)]
pub struct NodeDelta {
  pub key: Option<String>,
  pub labels: Option<FastSet<LabelId>>,
  pub labels_deleted: Option<FastSet<LabelId>>,
  /// `Some(Some(v))` = set to `v`; `Some(None)` = explicit tombstone.
  pub props: Option<FastMap<PropKeyId, Option<PropValue>>>,
}

impl NodeDelta {
  pub fn for_version(&self) -> NodeDelta {
    self.clone()
  }
}

/// In-memory mutation buffer layered atop a snapshot. See C2 in the design
/// notes: reconciliation on read is `deletedNodes` → `createdNodes` →
/// snapshot-with-`modifiedNodes`-overlay.
#[derive(Debug, Default)]
pub struct DeltaState {
  pub created_nodes: FastMap<NodeId, NodeDelta>,
  pub deleted_nodes: FastSet<NodeId>,
  pub modified_nodes: FastMap<NodeId, NodeDelta>,

  pub out_add: FastMap<NodeId, Vec<EdgePatch>>,
  pub out_del: FastMap<NodeId, Vec<EdgePatch>>,
  pub in_add: FastMap<NodeId, Vec<EdgePatch>>,
  pub in_del: FastMap<NodeId, Vec<EdgePatch>>,

  pub edge_props: FastMap<EdgeKey, FastMap<PropKeyId, Option<PropValue>>>,

  pub new_labels: FastMap<LabelId, String>,
  pub new_etypes: FastMap<ETypeId, String>,
  pub new_propkeys: FastMap<PropKeyId, String>,

  pub key_index: FastMap<String, NodeId>,
  pub key_index_deleted: FastSet<String>,
}

impl DeltaState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn clear(&mut self) {
    *self = Self::default();
  }

  pub fn is_node_deleted(&self, node_id: NodeId) -> bool {
    self.deleted_nodes.contains(&node_id)
  }

  pub fn is_node_created(&self, node_id: NodeId) -> bool {
    self.created_nodes.contains_key(&node_id)
  }

  pub fn node_delta(&self, node_id: NodeId) -> Option<&NodeDelta> {
    self
      .created_nodes
      .get(&node_id)
      .or_else(|| self.modified_nodes.get(&node_id))
  }

  /// Invariant: a NodeID is in at most one of `created_nodes` /
  /// `modified_nodes` / `deleted_nodes`. Creating a node that was deleted in
  /// the same overlay generation re-adds it (create-wins, see DESIGN.md for
  /// the create-then-delete-then-recreate decision).
  pub fn create_node(&mut self, node_id: NodeId, key: Option<&str>) {
    self.deleted_nodes.remove(&node_id);
    let entry = self.created_nodes.entry(node_id).or_default();
    if let Some(k) = key {
      entry.key = Some(k.to_string());
      self.key_index.insert(k.to_string(), node_id);
      self.key_index_deleted.remove(k);
    }
  }

  pub fn delete_node(&mut self, node_id: NodeId) {
    if let Some(created) = self.created_nodes.remove(&node_id) {
      // A node created and deleted within the same delta generation leaves
      // no tombstone: it never existed as far as the snapshot is concerned.
      if let Some(key) = created.key {
        self.key_index.remove(&key);
      }
      self.modified_nodes.remove(&node_id);
      return;
    }
    self.modified_nodes.remove(&node_id);
    self.deleted_nodes.insert(node_id);
  }

  fn modified_entry(&mut self, node_id: NodeId) -> &mut NodeDelta {
    if self.created_nodes.contains_key(&node_id) {
      return self.created_nodes.get_mut(&node_id).unwrap();
    }
    self.modified_nodes.entry(node_id).or_default()
  }

  pub fn add_node_label(&mut self, node_id: NodeId, label_id: LabelId) {
    let entry = self.modified_entry(node_id);
    if let Some(deleted) = entry.labels_deleted.as_mut() {
      deleted.remove(&label_id);
    }
    entry.labels.get_or_insert_with(FastSet::new).insert(label_id);
  }

  pub fn remove_node_label(&mut self, node_id: NodeId, label_id: LabelId) {
    let entry = self.modified_entry(node_id);
    if let Some(added) = entry.labels.as_mut() {
      added.remove(&label_id);
    }
    entry
      .labels_deleted
      .get_or_insert_with(FastSet::new)
      .insert(label_id);
  }

  pub fn set_node_prop(&mut self, node_id: NodeId, key_id: PropKeyId, value: PropValue) {
    self.set_node_prop_ref(node_id, key_id, value)
  }

  pub fn set_node_prop_ref(&mut self, node_id: NodeId, key_id: PropKeyId, value: PropValue) {
    let entry = self.modified_entry(node_id);
    entry
      .props
      .get_or_insert_with(FastMap::new)
      .insert(key_id, Some(value));
  }

  pub fn delete_node_prop(&mut self, node_id: NodeId, key_id: PropKeyId) {
    let entry = self.modified_entry(node_id);
    entry.props.get_or_insert_with(FastMap::new).insert(key_id, None);
  }

  pub fn node_prop(&self, node_id: NodeId, key_id: PropKeyId) -> Option<Option<&PropValue>> {
    self
      .node_delta(node_id)
      .and_then(|d| d.props.as_ref())
      .and_then(|p| p.get(&key_id))
      .map(|v| v.as_ref())
  }

  pub fn get_node_prop(&self, node_id: NodeId, key_id: PropKeyId) -> Option<Option<&PropValue>> {
    self.node_prop(node_id, key_id)
  }

  pub fn get_node_by_key(&self, key: &str) -> Option<NodeId> {
    self.key_index.get(key).copied()
  }

  /// Adds `(etype, other)` as an out/in edge, cancelling any matching
  /// pending delete first (§4.2: adds and deletes cancel).
  pub fn add_edge(&mut self, src: NodeId, etype: ETypeId, dst: NodeId) {
    insert_patch_cancel(&mut self.out_add, &mut self.out_del, src, etype, dst);
    insert_patch_cancel(&mut self.in_add, &mut self.in_del, dst, etype, src);
  }

  pub fn delete_edge(&mut self, src: NodeId, etype: ETypeId, dst: NodeId) {
    insert_patch_cancel(&mut self.out_del, &mut self.out_add, src, etype, dst);
    insert_patch_cancel(&mut self.in_del, &mut self.in_add, dst, etype, src);
    self.edge_props.remove(&(src, etype, dst));
  }

  pub fn is_edge_deleted(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    self
      .out_del
      .get(&src)
      .is_some_and(|v| v.binary_search(&EdgePatch { etype, other: dst }).is_ok())
  }

  pub fn is_edge_added(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    self
      .out_add
      .get(&src)
      .is_some_and(|v| v.contains(&EdgePatch { etype, other: dst }))
  }

  pub fn set_edge_prop(&mut self, src: NodeId, etype: ETypeId, dst: NodeId, key_id: PropKeyId, value: PropValue) {
    self.set_edge_prop_ref(src, etype, dst, key_id, value)
  }

  pub fn set_edge_prop_ref(
    &mut self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
    value: PropValue,
  ) {
    self
      .edge_props
      .entry((src, etype, dst))
      .or_default()
      .insert(key_id, Some(value));
  }

  pub fn delete_edge_prop(&mut self, src: NodeId, etype: ETypeId, dst: NodeId, key_id: PropKeyId) {
    self
      .edge_props
      .entry((src, etype, dst))
      .or_default()
      .insert(key_id, None);
  }

  pub fn edge_prop(&self, src: NodeId, etype: ETypeId, dst: NodeId, key_id: PropKeyId) -> Option<Option<&PropValue>> {
    self
      .edge_props
      .get(&(src, etype, dst))
      .and_then(|p| p.get(&key_id))
      .map(|v| v.as_ref())
  }

  pub fn define_label(&mut self, id: LabelId, name: &str) {
    self.new_labels.insert(id, name.to_string());
  }

  pub fn define_etype(&mut self, id: ETypeId, name: &str) {
    self.new_etypes.insert(id, name.to_string());
  }

  pub fn define_propkey(&mut self, id: PropKeyId, name: &str) {
    self.new_propkeys.insert(id, name.to_string());
  }

  pub fn total_edges_added(&self) -> usize {
    self.out_add.values().map(|v| v.len()).sum()
  }

  pub fn total_edges_deleted(&self) -> usize {
    self.out_del.values().map(|v| v.len()).sum()
  }
}

fn insert_patch_cancel(
  add: &mut FastMap<NodeId, Vec<EdgePatch>>,
  del: &mut FastMap<NodeId, Vec<EdgePatch>>,
  node: NodeId,
  etype: ETypeId,
  other: NodeId,
) {
  let patch = EdgePatch { etype, other };
  if let Some(del_list) = del.get_mut(&node) {
    if let Ok(idx) = del_list.binary_search(&patch) {
      del_list.remove(idx);
    }
  }
  let add_list = add.entry(node).or_default();
  if let Err(idx) = add_list.binary_search(&patch) {
    add_list.insert(idx, patch);
  }
}

// ============================================================================
// MVCC (C5)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvccTxStatus {
  Active,
  Committed,
  Aborted,
}

/// Key space over which MVCC tracks read/write sets for conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TxKey {
  Node(NodeId),
  NodeProp { node_id: NodeId, key_id: PropKeyId },
  NodeLabels(NodeId),
  NodeLabel { node_id: NodeId, label_id: LabelId },
  Edge { src: NodeId, etype: ETypeId, dst: NodeId },
  EdgeProp {
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  },
  NeighborsOut { node_id: NodeId, etype: Option<ETypeId> },
  NeighborsIn { node_id: NodeId, etype: Option<ETypeId> },
  Key(String),
}

/// Value carried by a node version-chain entry.
#[derive(Debug, Clone, Default)]
pub struct NodeVersionData {
  pub node_id: NodeId,
  pub delta: NodeDelta,
}

/// Snapshot/check-time result: `check()` never throws, it reports.
#[derive(Debug, Clone)]
pub struct CheckResult {
  pub valid: bool,
  pub errors: Vec<String>,
  pub warnings: Vec<String>,
}

/// MVCC-specific counters folded into `DbStats` when MVCC is enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct MvccStats {
  pub active_transactions: usize,
  pub min_active_ts: Timestamp,
  pub versions_pruned: u64,
  pub gc_runs: u64,
  pub last_gc_time: u64,
  pub committed_writes_size: usize,
  pub committed_writes_pruned: usize,
}

/// Engine-level statistics surface (`stats(db)`).
#[derive(Debug, Clone, Default)]
pub struct DbStats {
  pub snapshot_gen: u64,
  pub snapshot_nodes: u64,
  pub snapshot_edges: u64,
  pub snapshot_max_node_id: NodeId,
  pub delta_nodes_created: usize,
  pub delta_nodes_deleted: usize,
  pub delta_edges_added: u64,
  pub delta_edges_deleted: u64,
  pub wal_segment: u32,
  pub wal_bytes: u64,
  pub recommend_compact: bool,
  pub mvcc_stats: Option<MvccStats>,
}

/// Node-creation options shared by the engine-level API.
#[derive(Debug, Default, Clone)]
pub struct NodeOpts {
  pub key: Option<String>,
  pub labels: Option<Vec<LabelId>>,
  pub props: Option<Vec<(PropKeyId, PropValue)>>,
}

impl NodeOpts {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_key(mut self, key: impl Into<String>) -> Self {
    self.key = Some(key.into());
    self
  }

  pub fn with_label(mut self, label: LabelId) -> Self {
    self.labels.get_or_insert_with(Vec::new).push(label);
    self
  }

  pub fn with_prop(mut self, key: PropKeyId, value: PropValue) -> Self {
    self.props.get_or_insert_with(Vec::new).push((key, value));
    self
  }
}

/// Name-keyed dictionary maps shared by both container variants.
#[derive(Debug, Default)]
pub struct SchemaTables {
  pub label_names: HashMap<String, LabelId>,
  pub label_ids: HashMap<LabelId, String>,
  pub etype_names: HashMap<String, ETypeId>,
  pub etype_ids: HashMap<ETypeId, String>,
  pub propkey_names: HashMap<String, PropKeyId>,
  pub propkey_ids: HashMap<PropKeyId, String>,
}

impl SchemaTables {
  pub fn define_label(&mut self, id: LabelId, name: &str) {
    self.label_names.insert(name.to_string(), id);
    self.label_ids.insert(id, name.to_string());
  }

  pub fn define_etype(&mut self, id: ETypeId, name: &str) {
    self.etype_names.insert(name.to_string(), id);
    self.etype_ids.insert(id, name.to_string());
  }

  pub fn define_propkey(&mut self, id: PropKeyId, name: &str) {
    self.propkey_names.insert(name.to_string(), id);
    self.propkey_ids.insert(id, name.to_string());
  }
}

// ============================================================================
// Single-file container header (page 0)
// ============================================================================

/// The 4096-byte header page of a `.raydb` single-file container.
///
/// Mirrors §6's single-file header layout: magic, page geometry, dual WAL
/// region bookkeeping, active/previous snapshot generation, and the
/// checkpoint-in-progress flag used to recover from a crash mid-flip.
#[derive(Debug, Clone)]
pub struct DbHeaderV1 {
  pub page_size: u32,
  pub format_version: u32,
  pub min_reader_version: u32,
  pub flags: u32,
  pub change_counter: u64,
  pub db_size_pages: u64,

  pub snapshot_start_page: u64,
  pub snapshot_page_count: u64,
  pub active_snapshot_gen: u64,
  pub prev_snapshot_gen: u64,

  pub wal_start_page: u64,
  pub wal_page_count: u64,
  /// Which of the two WAL regions (0 or 1) is currently active for writes.
  pub active_wal_region: u8,
  pub wal_primary_head: u64,
  pub wal_secondary_head: u64,
  pub wal_head: u64,
  pub wal_tail: u64,

  pub max_node_id: NodeId,
  pub next_tx_id: TxId,
  pub last_commit_ts: Timestamp,
  pub schema_cookie: u64,

  pub checkpoint_in_progress: bool,
}

impl DbHeaderV1 {
  pub fn new(page_size: u32, wal_page_count: u64) -> Self {
    Self {
      page_size,
      format_version: crate::constants::VERSION_SINGLE_FILE,
      min_reader_version: crate::constants::MIN_READER_SINGLE_FILE,
      flags: crate::constants::DB_FLAG_WAL_MODE,
      change_counter: 0,
      db_size_pages: 1 + wal_page_count,
      snapshot_start_page: 0,
      snapshot_page_count: 0,
      active_snapshot_gen: 0,
      prev_snapshot_gen: 0,
      wal_start_page: 1,
      wal_page_count,
      active_wal_region: 0,
      wal_primary_head: 0,
      wal_secondary_head: 0,
      wal_head: 0,
      wal_tail: 0,
      max_node_id: 0,
      next_tx_id: crate::constants::INITIAL_TX_ID,
      last_commit_ts: 0,
      schema_cookie: 0,
      checkpoint_in_progress: false,
    }
  }

  pub fn primary_wal_page_count(&self) -> u64 {
    self.wal_page_count / 2
  }

  pub fn secondary_wal_page_count(&self) -> u64 {
    self.wal_page_count - self.primary_wal_page_count()
  }

  /// Serializes the header into a full page-sized buffer, magic first and
  /// a CRC32C of the first `DB_HEADER_CHECKSUM_SIZE` bytes appended as the
  /// final 4 bytes of the page.
  pub fn serialize_to_page(&self) -> Vec<u8> {
    use crate::constants::*;
    use crate::util::binary::*;
    use crate::util::crc::crc32c;

    let mut buf = Vec::with_capacity(self.page_size as usize);
    buf.extend_from_slice(&MAGIC_RAYDB);
    write_u32(&mut buf, self.page_size);
    write_u32(&mut buf, self.format_version);
    write_u32(&mut buf, self.min_reader_version);
    write_u32(&mut buf, self.flags);
    write_u64(&mut buf, self.change_counter);
    write_u64(&mut buf, self.db_size_pages);
    write_u64(&mut buf, self.snapshot_start_page);
    write_u64(&mut buf, self.snapshot_page_count);
    write_u64(&mut buf, self.active_snapshot_gen);
    write_u64(&mut buf, self.prev_snapshot_gen);
    write_u64(&mut buf, self.wal_start_page);
    write_u64(&mut buf, self.wal_page_count);
    buf.push(self.active_wal_region);
    buf.push(self.checkpoint_in_progress as u8);
    buf.extend_from_slice(&[0u8; 6]); // pad to 8-byte boundary
    write_u64(&mut buf, self.wal_primary_head);
    write_u64(&mut buf, self.wal_secondary_head);
    write_u64(&mut buf, self.wal_head);
    write_u64(&mut buf, self.wal_tail);
    write_u64(&mut buf, self.max_node_id);
    write_u64(&mut buf, self.next_tx_id);
    write_u64(&mut buf, self.last_commit_ts);
    write_u64(&mut buf, self.schema_cookie);

    buf.resize(DB_HEADER_CHECKSUM_SIZE, 0);
    let checksum = crc32c(&buf);
    write_u32(&mut buf, checksum);
    buf.resize(self.page_size as usize, 0);
    buf
  }

  pub fn parse(buf: &[u8]) -> crate::error::Result<Self> {
    use crate::constants::*;
    use crate::error::RayError;
    use crate::util::binary::*;
    use crate::util::crc::crc32c;

    if buf.len() < DB_HEADER_SIZE {
      return Err(RayError::format("header page shorter than DB_HEADER_SIZE"));
    }
    if buf[0..16] != MAGIC_RAYDB {
      return Err(RayError::format("bad single-file magic"));
    }
    let stored_crc = read_u32(buf, DB_HEADER_CHECKSUM_SIZE)?;
    let computed_crc = crc32c(&buf[0..DB_HEADER_CHECKSUM_SIZE]);
    if stored_crc != computed_crc {
      return Err(RayError::integrity("single-file header checksum mismatch"));
    }

    let mut off = 16;
    let page_size = read_u32(buf, off)?;
    off += 4;
    let format_version = read_u32(buf, off)?;
    off += 4;
    let min_reader_version = read_u32(buf, off)?;
    off += 4;
    if min_reader_version > VERSION_SINGLE_FILE {
      return Err(RayError::format(format!(
        "database requires reader version {min_reader_version}, this build supports {VERSION_SINGLE_FILE}"
      )));
    }
    let flags = read_u32(buf, off)?;
    off += 4;
    let change_counter = read_u64(buf, off)?;
    off += 8;
    let db_size_pages = read_u64(buf, off)?;
    off += 8;
    let snapshot_start_page = read_u64(buf, off)?;
    off += 8;
    let snapshot_page_count = read_u64(buf, off)?;
    off += 8;
    let active_snapshot_gen = read_u64(buf, off)?;
    off += 8;
    let prev_snapshot_gen = read_u64(buf, off)?;
    off += 8;
    let wal_start_page = read_u64(buf, off)?;
    off += 8;
    let wal_page_count = read_u64(buf, off)?;
    off += 8;
    let active_wal_region = buf[off];
    let checkpoint_in_progress = buf[off + 1] != 0;
    off += 8; // 2 flag bytes + 6 pad
    let wal_primary_head = read_u64(buf, off)?;
    let wal_secondary_head = read_u64(buf, off + 8)?;
    off += 16;
    let wal_head = read_u64(buf, off)?;
    off += 8;
    let wal_tail = read_u64(buf, off)?;
    off += 8;
    let max_node_id = read_u64(buf, off)?;
    off += 8;
    let next_tx_id = read_u64(buf, off)?;
    off += 8;
    let last_commit_ts = read_u64(buf, off)?;
    off += 8;
    let schema_cookie = read_u64(buf, off)?;

    Ok(Self {
      page_size,
      format_version,
      min_reader_version,
      flags,
      change_counter,
      db_size_pages,
      snapshot_start_page,
      snapshot_page_count,
      active_snapshot_gen,
      prev_snapshot_gen,
      wal_start_page,
      wal_page_count,
      active_wal_region,
      wal_primary_head,
      wal_secondary_head,
      wal_head,
      wal_tail,
      max_node_id,
      next_tx_id,
      last_commit_ts,
      schema_cookie,
      checkpoint_in_progress,
    })
  }
}

#[cfg(test)]
mod header_tests {
  use super::*;

  #[test]
  fn header_roundtrip() {
    let mut header = DbHeaderV1::new(4096, 32768);
    header.max_node_id = 42;
    header.active_snapshot_gen = 3;
    let page = header.serialize_to_page();
    let parsed = DbHeaderV1::parse(&page).unwrap();
    assert_eq!(parsed.max_node_id, 42);
    assert_eq!(parsed.active_snapshot_gen, 3);
    assert_eq!(parsed.page_size, 4096);
  }

  #[test]
  fn rejects_bad_magic() {
    let page = vec![0u8; 4096];
    assert!(DbHeaderV1::parse(&page).is_err());
  }
}
