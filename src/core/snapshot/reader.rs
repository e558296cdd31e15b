//! Zero-copy mmap-based snapshot reader.
//!
//! A [`SnapshotData`] borrows directly from the backing `Mmap`; every
//! accessor does bounds-checked slicing into the mapped region rather than
//! copying section payloads into owned buffers. The exception is a section
//! written compressed: those are decompressed once at parse time into an
//! owned buffer, since a compressed byte range can't be sliced in place.

use std::sync::Arc;

use memmap2::Mmap;

use crate::constants::*;
use crate::error::{RayError, Result};
use crate::types::*;
use crate::util::binary::{read_f64, read_i64, read_u32, read_u64};
use crate::util::compression::{decompress, Compression};
use crate::util::crc::crc32c;

#[derive(Debug, Clone, Copy)]
pub struct SnapshotHeader {
  pub version: u32,
  pub min_reader: u32,
  pub flags: u32,
  pub generation: u64,
  pub created_unix_ns: u64,
  pub num_nodes: u64,
  pub num_edges: u64,
  pub max_node_id: NodeId,
  pub num_labels: u64,
  pub num_etypes: u64,
  pub num_propkeys: u64,
  pub num_strings: u64,
}

#[derive(Clone, Copy)]
struct SectionEntry {
  offset: u64,
  length: u64,
  compression: Compression,
}

/// A parsed, validated snapshot image mapped from either a standalone
/// snapshot file or a byte range inside a single-file container.
pub struct SnapshotData {
  mmap: Arc<Mmap>,
  base: usize,
  pub header: SnapshotHeader,
  sections: Vec<Option<SectionEntry>>,
  /// Eagerly-decompressed payloads for sections whose `compression` isn't
  /// `None`. Uncompressed sections are served straight from the mmap by
  /// `section()` and never populate a slot here.
  decompressed: Vec<Option<Vec<u8>>>,
}

#[derive(Debug, Clone, Default)]
pub struct ParseSnapshotOptions {
  pub verify_footer_crc: bool,
}

impl SnapshotData {
  pub fn parse_at_offset(mmap: Arc<Mmap>, base: usize, opts: &ParseSnapshotOptions) -> Result<Self> {
    let buf = &mmap[base..];
    if buf.len() < SNAPSHOT_HEADER_SIZE {
      return Err(RayError::format("snapshot shorter than header"));
    }
    let magic = read_u32(buf, 0)?;
    if magic != MAGIC_SNAPSHOT {
      return Err(RayError::format("bad snapshot magic"));
    }
    let version = read_u32(buf, 4)?;
    let min_reader = read_u32(buf, 8)?;
    if min_reader > VERSION_SNAPSHOT {
      return Err(RayError::format(format!(
        "snapshot requires reader version {min_reader}, this build supports {VERSION_SNAPSHOT}"
      )));
    }
    let flags = read_u32(buf, 12)?;
    let generation = read_u64(buf, 16)?;
    let created_unix_ns = read_u64(buf, 24)?;
    let num_nodes = read_u64(buf, 32)?;
    let num_edges = read_u64(buf, 40)?;
    let max_node_id = read_u64(buf, 48)?;
    let num_labels = read_u64(buf, 56)?;
    let num_etypes = read_u64(buf, 64)?;
    let num_propkeys = read_u64(buf, 72)?;
    let num_strings = read_u64(buf, 80)?;

    let header = SnapshotHeader {
      version,
      min_reader,
      flags,
      generation,
      created_unix_ns,
      num_nodes,
      num_edges,
      max_node_id,
      num_labels,
      num_etypes,
      num_propkeys,
      num_strings,
    };

    // Section table directly follows the fixed header. It may describe up
    // to 25 logical slots (23 fixed + 2 edge-prop extension slots); unknown
    // trailing entries are tolerated for forward compatibility.
    let table_start = SNAPSHOT_HEADER_SIZE;
    let max_slots = SectionId::COUNT + 2;
    let mut sections: Vec<Option<SectionEntry>> = vec![None; max_slots];
    let mut cursor = table_start;
    // The table length isn't separately encoded; the writer always emits
    // exactly `max_slots` entries in a fixed order matching `SectionId`.
    for _ in 0..max_slots {
      if cursor + SECTION_ENTRY_SIZE > buf.len() {
        break;
      }
      let id = read_u32(buf, cursor)? as usize;
      let compression = Compression::from_u32(read_u32(buf, cursor + 4)?)?;
      let offset = read_u64(buf, cursor + 8)?;
      let length = read_u64(buf, cursor + 16)?;
      if id < max_slots {
        sections[id] = Some(SectionEntry { offset, length, compression });
      }
      cursor += SECTION_ENTRY_SIZE;
    }

    if opts.verify_footer_crc {
      if buf.len() < SNAPSHOT_FOOTER_SIZE {
        return Err(RayError::integrity("snapshot missing footer"));
      }
      let footer_at = buf.len() - SNAPSHOT_FOOTER_SIZE;
      let stored = read_u32(buf, footer_at)?;
      let computed = crc32c(&buf[..footer_at]);
      if stored != computed {
        return Err(RayError::integrity("snapshot footer CRC mismatch"));
      }
    }

    // Decompress compressed sections once, up front: decode failures are
    // fatal at open rather than surfacing lazily from a random accessor.
    let mut decompressed: Vec<Option<Vec<u8>>> = vec![None; sections.len()];
    for (id, entry) in sections.iter().enumerate() {
      let Some(entry) = entry else { continue };
      if entry.compression == Compression::None {
        continue;
      }
      let start = base + entry.offset as usize;
      let end = start + entry.length as usize;
      let raw = mmap
        .get(start..end)
        .ok_or_else(|| RayError::format("section out of bounds"))?;
      decompressed[id] = Some(decompress(raw, entry.compression, 0)?);
    }

    Ok(Self {
      mmap,
      base,
      header,
      sections,
      decompressed,
    })
  }

  fn section(&self, id: usize) -> Option<&[u8]> {
    if let Some(Some(owned)) = self.decompressed.get(id) {
      return Some(owned.as_slice());
    }
    let entry = self.sections.get(id).copied().flatten()?;
    let start = self.base + entry.offset as usize;
    let end = start + entry.length as usize;
    self.mmap.get(start..end)
  }

  fn u32_section(&self, id: usize) -> &[u8] {
    self.section(id).unwrap_or(&[])
  }

  // -- node id <-> phys index -------------------------------------------

  pub fn num_nodes(&self) -> usize {
    self.header.num_nodes as usize
  }

  pub fn phys_to_node_id(&self, phys: u32) -> Option<NodeId> {
    let data = self.section(SectionId::PhysToNodeId as usize)?;
    read_u64(data, phys as usize * 8).ok()
  }

  pub fn phys_node(&self, node_id: NodeId) -> Option<u32> {
    // Binary search: phys_to_nodeid is sorted ascending by construction.
    let data = self.section(SectionId::PhysToNodeId as usize)?;
    let n = data.len() / 8;
    let (mut lo, mut hi) = (0usize, n);
    while lo < hi {
      let mid = (lo + hi) / 2;
      let v = read_u64(data, mid * 8).ok()?;
      match v.cmp(&node_id) {
        std::cmp::Ordering::Equal => return Some(mid as u32),
        std::cmp::Ordering::Less => lo = mid + 1,
        std::cmp::Ordering::Greater => hi = mid,
      }
    }
    None
  }

  pub fn has_node(&self, node_id: NodeId) -> bool {
    self.phys_node(node_id).is_some()
  }

  // -- CSR ---------------------------------------------------------------

  fn csr_offsets(&self, section: SectionId) -> &[u8] {
    self.u32_section(section as usize)
  }

  fn offset_at(data: &[u8], idx: usize) -> u32 {
    if data.is_empty() {
      return 0;
    }
    read_u32(data, idx * 4).unwrap_or(0)
  }

  pub fn out_edges_range(&self, phys: u32) -> (u32, u32) {
    let offs = self.csr_offsets(SectionId::OutOffsets);
    (Self::offset_at(offs, phys as usize), Self::offset_at(offs, phys as usize + 1))
  }

  pub fn in_edges_range(&self, phys: u32) -> (u32, u32) {
    let offs = self.csr_offsets(SectionId::InOffsets);
    (Self::offset_at(offs, phys as usize), Self::offset_at(offs, phys as usize + 1))
  }

  pub fn out_dst(&self, idx: u32) -> u32 {
    Self::offset_at(self.u32_section(SectionId::OutDst as usize), idx as usize)
  }

  pub fn out_etype(&self, idx: u32) -> ETypeId {
    Self::offset_at(self.u32_section(SectionId::OutEtype as usize), idx as usize)
  }

  pub fn in_src(&self, idx: u32) -> u32 {
    Self::offset_at(self.u32_section(SectionId::InSrc as usize), idx as usize)
  }

  pub fn in_etype(&self, idx: u32) -> ETypeId {
    Self::offset_at(self.u32_section(SectionId::InEtype as usize), idx as usize)
  }

  pub fn in_out_index(&self, idx: u32) -> u32 {
    Self::offset_at(self.u32_section(SectionId::InOutIndex as usize), idx as usize)
  }

  pub fn has_edge(&self, src_phys: u32, etype: ETypeId, dst_phys: u32) -> bool {
    let (start, end) = self.out_edges_range(src_phys);
    for i in start..end {
      if self.out_dst(i) == dst_phys && self.out_etype(i) == etype {
        return true;
      }
    }
    false
  }

  pub fn out_neighbors(&self, node_id: NodeId, etype: Option<ETypeId>) -> Vec<(NodeId, ETypeId)> {
    let Some(phys) = self.phys_node(node_id) else {
      return Vec::new();
    };
    let (start, end) = self.out_edges_range(phys);
    let mut out = Vec::new();
    for i in start..end {
      let e = self.out_etype(i);
      if let Some(filter) = etype {
        if e != filter {
          continue;
        }
      }
      if let Some(nid) = self.phys_to_node_id(self.out_dst(i)) {
        out.push((nid, e));
      }
    }
    out
  }

  pub fn in_neighbors(&self, node_id: NodeId, etype: Option<ETypeId>) -> Vec<(NodeId, ETypeId)> {
    let Some(phys) = self.phys_node(node_id) else {
      return Vec::new();
    };
    let (start, end) = self.in_edges_range(phys);
    let mut out = Vec::new();
    for i in start..end {
      let e = self.in_etype(i);
      if let Some(filter) = etype {
        if e != filter {
          continue;
        }
      }
      if let Some(nid) = self.phys_to_node_id(self.in_src(i)) {
        out.push((nid, e));
      }
    }
    out
  }

  // -- strings -------------------------------------------------------

  fn string_at(&self, id: StringId) -> Option<&str> {
    let offsets = self.section(SectionId::StringOffsets as usize)?;
    let bytes = self.section(SectionId::StringBytes as usize)?;
    let start = read_u32(offsets, id as usize * 4).ok()? as usize;
    let end = read_u32(offsets, (id as usize + 1) * 4).ok()? as usize;
    std::str::from_utf8(bytes.get(start..end)?).ok()
  }

  pub fn get_label_name(&self, id: LabelId) -> Option<&str> {
    let ids = self.section(SectionId::LabelStringIds as usize)?;
    let sid = read_u32(ids, (id as usize - 1) * 4).ok()?;
    self.string_at(sid)
  }

  pub fn get_etype_name(&self, id: ETypeId) -> Option<&str> {
    let ids = self.section(SectionId::EtypeStringIds as usize)?;
    let sid = read_u32(ids, (id as usize - 1) * 4).ok()?;
    self.string_at(sid)
  }

  pub fn get_propkey_name(&self, id: PropKeyId) -> Option<&str> {
    let ids = self.section(SectionId::PropkeyStringIds as usize)?;
    let sid = read_u32(ids, (id as usize - 1) * 4).ok()?;
    self.string_at(sid)
  }

  pub fn node_key(&self, node_id: NodeId) -> Option<&str> {
    let phys = self.phys_node(node_id)?;
    let ids = self.section(SectionId::NodeKeyString as usize)?;
    let sid = read_u32(ids, phys as usize * 4).ok()?;
    if sid == 0 {
      return None;
    }
    self.string_at(sid)
  }

  // -- key index -------------------------------------------------------

  pub fn get_node_by_key(&self, key: &str) -> Option<NodeId> {
    let data = self.section(SectionId::KeyEntries as usize)?;
    let hash = crate::util::hash::hash_str(key);
    let n = data.len() / KEY_INDEX_ENTRY_SIZE;
    let (mut lo, mut hi) = (0usize, n);
    while lo < hi {
      let mid = (lo + hi) / 2;
      let h = read_u64(data, mid * KEY_INDEX_ENTRY_SIZE).ok()?;
      if h < hash {
        lo = mid + 1;
      } else {
        hi = mid;
      }
    }
    while lo < n {
      let entry_off = lo * KEY_INDEX_ENTRY_SIZE;
      let h = read_u64(data, entry_off).ok()?;
      if h != hash {
        break;
      }
      let sid = read_u32(data, entry_off + 8).ok()?;
      let node_id = read_u64(data, entry_off + 16).ok()?;
      if self.string_at(sid) == Some(key) {
        return Some(node_id);
      }
      lo += 1;
    }
    None
  }

  // -- node labels -------------------------------------------------------

  pub fn node_labels(&self, phys: u32) -> Option<Vec<LabelId>> {
    let offs = self.u32_section(SectionId::NodeLabelOffsets as usize);
    let ids = self.u32_section(SectionId::NodeLabelIds as usize);
    let (start, end) = (Self::offset_at(offs, phys as usize), Self::offset_at(offs, phys as usize + 1));
    Some((start..end).map(|i| Self::offset_at(ids, i as usize)).collect())
  }

  // -- node / edge properties -------------------------------------------

  fn decode_prop_value(&self, raw: &[u8]) -> Result<PropValue> {
    let tag = PropValueTag::from_u8(raw[0]).ok_or_else(|| RayError::format("bad prop value tag"))?;
    Ok(match tag {
      PropValueTag::Null => PropValue::Null,
      PropValueTag::Bool => PropValue::Bool(raw[8] != 0),
      PropValueTag::I64 => PropValue::I64(read_i64(raw, 8)?),
      PropValueTag::F64 => PropValue::F64(read_f64(raw, 8)?),
      PropValueTag::String => {
        let sid = read_u32(raw, 8)?;
        PropValue::String(self.string_at(sid).unwrap_or_default().to_string())
      }
    })
  }

  pub fn node_prop(&self, phys: u32, key_id: PropKeyId) -> Option<PropValue> {
    let offs = self.u32_section(SectionId::NodePropOffsets as usize);
    let keys = self.u32_section(SectionId::NodePropKeys as usize);
    let vals = self.section(SectionId::NodePropVals as usize)?;
    let (start, end) = (Self::offset_at(offs, phys as usize), Self::offset_at(offs, phys as usize + 1));
    for i in start..end {
      if Self::offset_at(keys, i as usize) == key_id {
        let raw = vals.get(i as usize * PROP_VALUE_DISK_SIZE..(i as usize + 1) * PROP_VALUE_DISK_SIZE)?;
        return self.decode_prop_value(raw).ok();
      }
    }
    None
  }

  pub fn edge_prop(&self, out_edge_pos: u32, key_id: PropKeyId) -> Option<PropValue> {
    let offs = self.u32_section(SectionId::EdgePropOffsets as usize);
    let keys = self.u32_section(EDGE_PROP_KEYS_SLOT);
    let vals = self.section(EDGE_PROP_VALS_SLOT)?;
    let (start, end) = (
      Self::offset_at(offs, out_edge_pos as usize),
      Self::offset_at(offs, out_edge_pos as usize + 1),
    );
    for i in start..end {
      if Self::offset_at(keys, i as usize) == key_id {
        let raw = vals.get(i as usize * PROP_VALUE_DISK_SIZE..(i as usize + 1) * PROP_VALUE_DISK_SIZE)?;
        return self.decode_prop_value(raw).ok();
      }
    }
    None
  }

  pub fn out_edge_position(&self, src_phys: u32, etype: ETypeId, dst_phys: u32) -> Option<u32> {
    let (start, end) = self.out_edges_range(src_phys);
    (start..end).find(|&i| self.out_dst(i) == dst_phys && self.out_etype(i) == etype)
  }

  pub fn find_edge_index(&self, src_phys: u32, etype: ETypeId, dst_phys: u32) -> Option<u32> {
    self.out_edge_position(src_phys, etype, dst_phys)
  }

  pub fn get_edge_props(&self, out_edge_pos: u32) -> Option<std::collections::HashMap<PropKeyId, PropValue>> {
    self.edge_props(out_edge_pos)
  }

  pub fn edge_props(&self, out_edge_pos: u32) -> Option<std::collections::HashMap<PropKeyId, PropValue>> {
    let offs = self.u32_section(SectionId::EdgePropOffsets as usize);
    let keys = self.u32_section(EDGE_PROP_KEYS_SLOT);
    let (start, end) = (
      Self::offset_at(offs, out_edge_pos as usize),
      Self::offset_at(offs, out_edge_pos as usize + 1),
    );
    let mut out = std::collections::HashMap::new();
    for i in start..end {
      let key_id = Self::offset_at(keys, i as usize);
      if let Some(v) = self.edge_prop(out_edge_pos, key_id) {
        out.insert(key_id, v);
      }
    }
    Some(out)
  }

  // -- convenience aliases used by the single-file query path -----------

  pub fn get_node_id(&self, phys: u32) -> Option<NodeId> {
    self.phys_to_node_id(phys)
  }

  pub fn get_phys_node(&self, node_id: NodeId) -> Option<u32> {
    self.phys_node(node_id)
  }

  /// `(dst_phys, etype)` pairs for every out-edge of `phys`, in CSR order.
  pub fn iter_out_edges(&self, phys: u32) -> impl Iterator<Item = (u32, ETypeId)> + '_ {
    let (start, end) = self.out_edges_range(phys);
    (start..end).map(move |i| (self.out_dst(i), self.out_etype(i)))
  }

  /// `(src_phys, etype, out_edge_pos)` triples for every in-edge of `phys`, in CSR order.
  /// `out_edge_pos` indexes the out-edge arrays, for edge-property lookups.
  pub fn iter_in_edges(&self, phys: u32) -> impl Iterator<Item = (u32, ETypeId, u32)> + '_ {
    let (start, end) = self.in_edges_range(phys);
    (start..end).map(move |i| (self.in_src(i), self.in_etype(i), self.in_out_index(i)))
  }

  pub fn get_out_degree(&self, phys: u32) -> Option<usize> {
    let (start, end) = self.out_edges_range(phys);
    Some((end - start) as usize)
  }

  pub fn get_node_props(&self, phys: u32) -> Option<std::collections::HashMap<PropKeyId, PropValue>> {
    let node_id = self.phys_to_node_id(phys)?;
    let offs = self.u32_section(SectionId::NodePropOffsets as usize);
    let keys = self.u32_section(SectionId::NodePropKeys as usize);
    let (start, end) = (Self::offset_at(offs, phys as usize), Self::offset_at(offs, phys as usize + 1));
    let mut out = std::collections::HashMap::new();
    for i in start..end {
      let key_id = Self::offset_at(keys, i as usize);
      if let Some(v) = self.node_prop(phys, key_id) {
        out.insert(key_id, v);
      }
    }
    Some(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::snapshot::writer::{build_snapshot_to_memory, EdgeInput, NodeInput, SnapshotBuildInput};

  fn build() -> Arc<Mmap> {
    let buf = build_snapshot_to_memory(SnapshotBuildInput {
      generation: 1,
      created_unix_ns: 0,
      nodes: vec![
        NodeInput { node_id: 1, key: Some("alice".into()), labels: vec![1], props: vec![(1, PropValue::I64(30))] },
        NodeInput { node_id: 2, key: Some("bob".into()), labels: vec![], props: vec![] },
      ],
      edges: vec![EdgeInput { src: 1, etype: 1, dst: 2, props: vec![(2, PropValue::Bool(true))] }],
      labels: vec![(1, "Person".into())],
      etypes: vec![(1, "KNOWS".into())],
      propkeys: vec![(1, "age".into()), (2, "since2020".into())],
    })
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap.gds");
    std::fs::write(&path, &buf).unwrap();
    let file = std::fs::File::open(&path).unwrap();
    let mmap = unsafe { Mmap::map(&file).unwrap() };
    std::mem::forget(dir); // keep tempdir alive for the mmap's lifetime
    Arc::new(mmap)
  }

  #[test]
  fn reads_back_nodes_and_edges() {
    let mmap = build();
    let snap = SnapshotData::parse_at_offset(mmap, 0, &ParseSnapshotOptions { verify_footer_crc: true }).unwrap();
    assert_eq!(snap.num_nodes(), 2);
    assert!(snap.has_node(1));
    assert!(snap.has_node(2));
    assert!(!snap.has_node(99));
    assert_eq!(snap.node_key(1), Some("alice"));
    assert_eq!(snap.get_node_by_key("bob"), Some(2));
    let alice_phys = snap.phys_node(1).unwrap();
    assert_eq!(snap.node_prop(alice_phys, 1), Some(PropValue::I64(30)));
    assert_eq!(snap.node_labels(alice_phys), Some(vec![1]));
  }

  #[test]
  fn edge_lookup_and_reciprocity() {
    let mmap = build();
    let snap = SnapshotData::parse_at_offset(mmap, 0, &ParseSnapshotOptions::default()).unwrap();
    let src_phys = snap.phys_node(1).unwrap();
    let dst_phys = snap.phys_node(2).unwrap();
    assert!(snap.has_edge(src_phys, 1, dst_phys));
    assert_eq!(snap.out_neighbors(1, None), vec![(2, 1)]);
    assert_eq!(snap.in_neighbors(2, None), vec![(1, 1)]);
  }
}
