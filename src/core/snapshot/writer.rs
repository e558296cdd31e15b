//! Builds an immutable snapshot image from a logical graph state: a 88-byte
//! header, a 23-entry section table, section payloads, and a 4-byte footer
//! CRC32C over everything preceding it.

use hashbrown::HashMap as FastMap;

use crate::constants::*;
use crate::error::Result;
use crate::types::*;
use crate::util::binary::{align_up, write_f64, write_i64, write_u32, write_u64};
use crate::util::compression::{compress, Compression};
use crate::util::crc::crc32c;
use crate::util::hash::hash_str;

/// One fully-materialized node's worth of input to the snapshot builder.
pub struct NodeInput {
  pub node_id: NodeId,
  pub key: Option<String>,
  pub labels: Vec<LabelId>,
  pub props: Vec<(PropKeyId, PropValue)>,
}

/// One directed edge plus its forward-direction properties.
pub struct EdgeInput {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
  pub props: Vec<(PropKeyId, PropValue)>,
}

pub struct SnapshotBuildInput {
  pub generation: u64,
  pub created_unix_ns: u64,
  pub nodes: Vec<NodeInput>,
  pub edges: Vec<EdgeInput>,
  pub labels: Vec<(LabelId, String)>,
  pub etypes: Vec<(ETypeId, String)>,
  pub propkeys: Vec<(PropKeyId, String)>,
}

/// Interns strings, reserving id 0 for the empty string so that "no key"
/// can be represented without an Option at the wire level.
struct StringTable {
  strings: Vec<String>,
  index: FastMap<String, StringId>,
}

impl StringTable {
  fn new() -> Self {
    let mut table = Self {
      strings: Vec::new(),
      index: FastMap::new(),
    };
    table.intern("");
    table
  }

  fn intern(&mut self, s: &str) -> StringId {
    if let Some(&id) = self.index.get(s) {
      return id;
    }
    let id = self.strings.len() as StringId;
    self.strings.push(s.to_string());
    self.index.insert(s.to_string(), id);
    id
  }

  fn encode(&self) -> (Vec<u8>, Vec<u8>) {
    let mut offsets = Vec::with_capacity((self.strings.len() + 1) * 4);
    let mut bytes = Vec::new();
    let mut off = 0u32;
    for s in &self.strings {
      write_u32(&mut offsets, off);
      bytes.extend_from_slice(s.as_bytes());
      off += s.len() as u32;
    }
    write_u32(&mut offsets, off);
    (offsets, bytes)
  }
}

fn encode_prop_value(table: &mut StringTable, value: &PropValue) -> [u8; PROP_VALUE_DISK_SIZE] {
  let mut buf = [0u8; PROP_VALUE_DISK_SIZE];
  match value {
    PropValue::Null => buf[0] = PropValueTag::Null as u8,
    PropValue::Bool(b) => {
      buf[0] = PropValueTag::Bool as u8;
      buf[8] = *b as u8;
    }
    PropValue::I64(v) => {
      buf[0] = PropValueTag::I64 as u8;
      let mut tmp = Vec::new();
      write_i64(&mut tmp, *v);
      buf[8..16].copy_from_slice(&tmp);
    }
    PropValue::F64(v) => {
      buf[0] = PropValueTag::F64 as u8;
      let mut tmp = Vec::new();
      write_f64(&mut tmp, *v);
      buf[8..16].copy_from_slice(&tmp);
    }
    PropValue::String(s) => {
      buf[0] = PropValueTag::String as u8;
      let id = table.intern(s);
      let mut tmp = Vec::new();
      write_u32(&mut tmp, id);
      buf[8..12].copy_from_slice(&tmp);
    }
  }
  buf
}

struct CsrBuild {
  offsets: Vec<u8>,
  neighbor: Vec<u8>,
  etype: Vec<u8>,
  out_in_index: Vec<u8>,
}

/// Builds one direction's CSR arrays sorted by `(etype, neighbor)`, matching
/// the ordering the reciprocity checker expects on both sides. Also returns,
/// per sorted position, the original logical edge index it came from.
fn build_csr(num_phys: usize, mut edges: Vec<(u32, ETypeId, u32, u32)>) -> CsrBuild {
  edges.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));

  let mut offsets = vec![0u32; num_phys + 1];
  for &(owner, _, _, _) in &edges {
    offsets[owner as usize + 1] += 1;
  }
  for i in 0..num_phys {
    offsets[i + 1] += offsets[i];
  }

  let mut neighbor_arr = vec![0u32; edges.len()];
  let mut etype_arr = vec![0u32; edges.len()];
  let mut index_arr = vec![0u32; edges.len()];
  let mut cursor = offsets.clone();
  for &(owner, etype, neighbor, orig_idx) in &edges {
    let pos = cursor[owner as usize] as usize;
    neighbor_arr[pos] = neighbor;
    etype_arr[pos] = etype;
    index_arr[pos] = orig_idx;
    cursor[owner as usize] += 1;
  }

  let mut offsets_buf = Vec::new();
  for o in &offsets {
    write_u32(&mut offsets_buf, *o);
  }
  let mut neighbor_buf = Vec::new();
  for n in &neighbor_arr {
    write_u32(&mut neighbor_buf, *n);
  }
  let mut etype_buf = Vec::new();
  for e in &etype_arr {
    write_u32(&mut etype_buf, *e);
  }
  let mut index_buf = Vec::new();
  for i in &index_arr {
    write_u32(&mut index_buf, *i);
  }

  CsrBuild {
    offsets: offsets_buf,
    neighbor: neighbor_buf,
    etype: etype_buf,
    out_in_index: index_buf,
  }
}

struct Section {
  id: u32,
  data: Vec<u8>,
}

/// Encodes `input` into a fully-formed, mmap-ready snapshot byte buffer.
pub fn build_snapshot_to_memory(input: SnapshotBuildInput) -> Result<Vec<u8>> {
  let num_nodes = input.nodes.len() as u32;
  let max_node_id = input.nodes.iter().map(|n| n.node_id).max().unwrap_or(0);

  let mut node_ids: Vec<NodeId> = input.nodes.iter().map(|n| n.node_id).collect();
  node_ids.sort_unstable();
  let mut node_id_to_phys: FastMap<NodeId, u32> = FastMap::new();
  for (phys, &id) in node_ids.iter().enumerate() {
    node_id_to_phys.insert(id, phys as u32);
  }

  let mut strings = StringTable::new();

  let mut out_edges = Vec::with_capacity(input.edges.len());
  let mut in_edges = Vec::with_capacity(input.edges.len());
  for (idx, e) in input.edges.iter().enumerate() {
    let src_phys = *node_id_to_phys
      .get(&e.src)
      .expect("edge references node outside node set");
    let dst_phys = *node_id_to_phys
      .get(&e.dst)
      .expect("edge references node outside node set");
    out_edges.push((src_phys, e.etype, dst_phys, idx as u32));
    in_edges.push((dst_phys, e.etype, src_phys, idx as u32));
  }

  let out_csr = build_csr(node_ids.len(), out_edges);
  let in_csr = build_csr(node_ids.len(), in_edges);

  // Map each logical edge index to its sorted position in the out array,
  // then use that to build in_out_index and the edge-property ordering.
  let mut out_pos_by_edge_idx = vec![0u32; input.edges.len()];
  for (pos, chunk) in out_csr.out_in_index.chunks_exact(4).enumerate() {
    let orig_idx = u32::from_le_bytes(chunk.try_into().unwrap());
    out_pos_by_edge_idx[orig_idx as usize] = pos as u32;
  }

  let mut in_out_index_buf = Vec::new();
  for chunk in in_csr.out_in_index.chunks_exact(4) {
    let orig_idx = u32::from_le_bytes(chunk.try_into().unwrap());
    write_u32(&mut in_out_index_buf, out_pos_by_edge_idx[orig_idx as usize]);
  }

  // phys_to_nodeid
  let mut phys_to_nodeid_buf = Vec::new();
  for &id in &node_ids {
    write_u64(&mut phys_to_nodeid_buf, id);
  }

  // Node labels (sorted id lists per phys node, offsets array)
  let mut node_label_offsets = Vec::new();
  let mut node_label_ids = Vec::new();
  let mut off = 0u32;
  write_u32(&mut node_label_offsets, off);
  for &id in &node_ids {
    let node = input.nodes.iter().find(|n| n.node_id == id).unwrap();
    let mut labels = node.labels.clone();
    labels.sort_unstable();
    for l in &labels {
      write_u32(&mut node_label_ids, *l);
      off += 1;
    }
    write_u32(&mut node_label_offsets, off);
  }

  // Node properties: offsets + parallel keys/vals arrays.
  let mut node_prop_offsets = Vec::new();
  let mut node_prop_keys = Vec::new();
  let mut node_prop_vals = Vec::new();
  let mut poff = 0u32;
  write_u32(&mut node_prop_offsets, poff);
  for &id in &node_ids {
    let node = input.nodes.iter().find(|n| n.node_id == id).unwrap();
    let mut props = node.props.clone();
    props.sort_by_key(|(k, _)| *k);
    for (k, v) in &props {
      write_u32(&mut node_prop_keys, *k);
      node_prop_vals.extend_from_slice(&encode_prop_value(&mut strings, v));
      poff += 1;
    }
    write_u32(&mut node_prop_offsets, poff);
  }

  // Edge properties, indexed by sorted out-edge position.
  let mut sorted_edges: Vec<(u32, &EdgeInput)> = input
    .edges
    .iter()
    .enumerate()
    .map(|(i, e)| (out_pos_by_edge_idx[i], e))
    .collect();
  sorted_edges.sort_by_key(|(pos, _)| *pos);
  let mut edge_prop_offsets = Vec::new();
  let mut edge_prop_keys = Vec::new();
  let mut edge_prop_vals = Vec::new();
  let mut eoff = 0u32;
  write_u32(&mut edge_prop_offsets, eoff);
  for (_, e) in &sorted_edges {
    let mut props = e.props.clone();
    props.sort_by_key(|(k, _)| *k);
    for (k, v) in &props {
      write_u32(&mut edge_prop_keys, *k);
      edge_prop_vals.extend_from_slice(&encode_prop_value(&mut strings, v));
      eoff += 1;
    }
    write_u32(&mut edge_prop_offsets, eoff);
  }

  // Node keys: stringId per phys node, 0 (empty string) if absent.
  let mut node_key_string = Vec::new();
  for &id in &node_ids {
    let node = input.nodes.iter().find(|n| n.node_id == id).unwrap();
    let sid = node.key.as_deref().map(|k| strings.intern(k)).unwrap_or(0);
    write_u32(&mut node_key_string, sid);
  }

  // Key index: (hash64, stringId, nodeId) sorted by hash then stringId then nodeId.
  let mut key_entries: Vec<(u64, StringId, NodeId)> = Vec::new();
  for node in &input.nodes {
    if let Some(key) = &node.key {
      let sid = strings.intern(key);
      key_entries.push((hash_str(key), sid, node.node_id));
    }
  }
  key_entries.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
  let mut key_entries_buf = Vec::new();
  for (h, sid, nid) in &key_entries {
    write_u64(&mut key_entries_buf, *h);
    write_u32(&mut key_entries_buf, *sid);
    write_u32(&mut key_entries_buf, 0); // reserved
    write_u64(&mut key_entries_buf, *nid);
  }

  // Dictionary string-id tables.
  let mut label_string_ids = Vec::new();
  let mut sorted_labels = input.labels.clone();
  sorted_labels.sort_by_key(|(id, _)| *id);
  for (_, name) in &sorted_labels {
    write_u32(&mut label_string_ids, strings.intern(name));
  }
  let mut etype_string_ids = Vec::new();
  let mut sorted_etypes = input.etypes.clone();
  sorted_etypes.sort_by_key(|(id, _)| *id);
  for (_, name) in &sorted_etypes {
    write_u32(&mut etype_string_ids, strings.intern(name));
  }
  let mut propkey_string_ids = Vec::new();
  let mut sorted_propkeys = input.propkeys.clone();
  sorted_propkeys.sort_by_key(|(id, _)| *id);
  for (_, name) in &sorted_propkeys {
    write_u32(&mut propkey_string_ids, strings.intern(name));
  }

  let (string_offsets, string_bytes) = strings.encode();
  let num_strings = strings.strings.len() as u32;

  let sections = vec![
    Section { id: SectionId::PhysToNodeId as u32, data: phys_to_nodeid_buf },
    Section { id: SectionId::NodeIdToPhys as u32, data: Vec::new() },
    Section { id: SectionId::OutOffsets as u32, data: out_csr.offsets },
    Section { id: SectionId::OutDst as u32, data: out_csr.neighbor },
    Section { id: SectionId::OutEtype as u32, data: out_csr.etype },
    Section { id: SectionId::InOffsets as u32, data: in_csr.offsets },
    Section { id: SectionId::InSrc as u32, data: in_csr.neighbor },
    Section { id: SectionId::InEtype as u32, data: in_csr.etype },
    Section { id: SectionId::InOutIndex as u32, data: in_out_index_buf },
    Section { id: SectionId::StringOffsets as u32, data: string_offsets },
    Section { id: SectionId::StringBytes as u32, data: string_bytes },
    Section { id: SectionId::LabelStringIds as u32, data: label_string_ids },
    Section { id: SectionId::EtypeStringIds as u32, data: etype_string_ids },
    Section { id: SectionId::PropkeyStringIds as u32, data: propkey_string_ids },
    Section { id: SectionId::NodeKeyString as u32, data: node_key_string },
    Section { id: SectionId::KeyEntries as u32, data: key_entries_buf },
    Section { id: SectionId::KeyBuckets as u32, data: Vec::new() },
    Section { id: SectionId::NodeLabelOffsets as u32, data: node_label_offsets },
    Section { id: SectionId::NodeLabelIds as u32, data: node_label_ids },
    Section { id: SectionId::NodePropOffsets as u32, data: node_prop_offsets },
    Section { id: SectionId::NodePropKeys as u32, data: node_prop_keys },
    Section { id: SectionId::NodePropVals as u32, data: node_prop_vals },
    Section { id: SectionId::EdgePropOffsets as u32, data: edge_prop_offsets },
    Section { id: EDGE_PROP_KEYS_SLOT as u32, data: edge_prop_keys },
    Section { id: EDGE_PROP_VALS_SLOT as u32, data: edge_prop_vals },
  ];

  assemble(&input, num_nodes, max_node_id, num_strings, sections)
}

fn assemble(
  input: &SnapshotBuildInput,
  num_nodes: u32,
  max_node_id: NodeId,
  num_strings: u32,
  sections: Vec<Section>,
) -> Result<Vec<u8>> {
  let num_edges = input.edges.len() as u64;
  let section_table_size = sections.len() * SECTION_ENTRY_SIZE;

  let mut header = Vec::with_capacity(SNAPSHOT_HEADER_SIZE);
  write_u32(&mut header, MAGIC_SNAPSHOT);
  write_u32(&mut header, VERSION_SNAPSHOT);
  write_u32(&mut header, MIN_READER_SNAPSHOT);
  write_u32(&mut header, 0); // flags
  write_u64(&mut header, input.generation);
  write_u64(&mut header, input.created_unix_ns);
  write_u64(&mut header, num_nodes as u64);
  write_u64(&mut header, num_edges);
  write_u64(&mut header, max_node_id);
  write_u64(&mut header, input.labels.len() as u64);
  write_u64(&mut header, input.etypes.len() as u64);
  write_u64(&mut header, input.propkeys.len() as u64);
  write_u64(&mut header, num_strings as u64);
  header.resize(SNAPSHOT_HEADER_SIZE, 0);

  let mut offset = align_up(SNAPSHOT_HEADER_SIZE + section_table_size, SECTION_ALIGNMENT) as u64;
  let mut table_entries = Vec::new();
  let mut payloads = Vec::new();
  for section in &sections {
    // Compress if it's large enough for the frame overhead to pay off, and
    // only keep the compressed form if it's actually smaller.
    let (on_disk, compression): (std::borrow::Cow<[u8]>, Compression) =
      if section.data.len() > SNAPSHOT_COMPRESSION_THRESHOLD {
        let compressed = compress(&section.data, Compression::Zstd)?;
        if compressed.len() < section.data.len() {
          (compressed.into(), Compression::Zstd)
        } else {
          ((&section.data[..]).into(), Compression::None)
        }
      } else {
        ((&section.data[..]).into(), Compression::None)
      };

    let len = on_disk.len() as u64;
    write_u32(&mut table_entries, section.id);
    write_u32(&mut table_entries, compression as u32);
    write_u64(&mut table_entries, offset);
    write_u64(&mut table_entries, len);
    let padded = align_up(on_disk.len(), SECTION_ALIGNMENT);
    payloads.extend_from_slice(&on_disk);
    payloads.resize(payloads.len() + (padded - on_disk.len()), 0);
    offset += padded as u64;
  }

  let mut buf = Vec::with_capacity(offset as usize + SNAPSHOT_FOOTER_SIZE);
  buf.extend_from_slice(&header);
  buf.extend_from_slice(&table_entries);
  buf.resize(align_up(buf.len(), SECTION_ALIGNMENT), 0);
  buf.extend_from_slice(&payloads);

  let footer_crc = crc32c(&buf);
  write_u32(&mut buf, footer_crc);
  Ok(buf)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_input() -> SnapshotBuildInput {
    SnapshotBuildInput {
      generation: 1,
      created_unix_ns: 0,
      nodes: vec![
        NodeInput { node_id: 1, key: Some("alice".into()), labels: vec![1], props: vec![(1, PropValue::I64(30))] },
        NodeInput { node_id: 2, key: Some("bob".into()), labels: vec![1], props: vec![] },
      ],
      edges: vec![EdgeInput { src: 1, etype: 1, dst: 2, props: vec![] }],
      labels: vec![(1, "Person".into())],
      etypes: vec![(1, "KNOWS".into())],
      propkeys: vec![(1, "age".into())],
    }
  }

  #[test]
  fn builds_nonempty_buffer_with_valid_header() {
    let buf = build_snapshot_to_memory(sample_input()).unwrap();
    assert!(buf.len() > SNAPSHOT_HEADER_SIZE);
    assert_eq!(&buf[0..4], &MAGIC_SNAPSHOT.to_le_bytes());
  }

  #[test]
  fn footer_crc_covers_whole_buffer() {
    let mut buf = build_snapshot_to_memory(sample_input()).unwrap();
    let last = buf.len() - 1;
    buf[last / 2] ^= 0xFF;
    let stored = u32::from_le_bytes(buf[buf.len() - 4..].try_into().unwrap());
    let computed = crc32c(&buf[..buf.len() - 4]);
    assert_ne!(stored, computed);
  }
}
