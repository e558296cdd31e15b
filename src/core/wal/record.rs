//! WAL record encoding: a 20-byte fixed header, a variable payload, a 4-byte
//! CRC32C trailer, and zero padding to the next 8-byte boundary.

use crate::constants::{WAL_RECORD_ALIGNMENT, WAL_RECORD_HEADER_SIZE};
use crate::error::{RayError, Result};
use crate::types::{ETypeId, LabelId, NodeId, PropKeyId, PropValue, PropValueTag, TxId, WalRecordType};
use crate::util::binary::{align_up, read_f64, read_i64, read_u32, read_u64, write_f64, write_i64, write_u32, write_u64};
use crate::util::crc::crc32c;

/// A single WAL record, already framed with header + payload + CRC + padding.
#[derive(Debug, Clone)]
pub struct WalRecord {
  pub rec_type: WalRecordType,
  pub flags: u8,
  pub txid: TxId,
  pub payload: Vec<u8>,
}

impl WalRecord {
  pub fn new(rec_type: WalRecordType, txid: TxId, payload: Vec<u8>) -> Self {
    Self {
      rec_type,
      flags: 0,
      txid,
      payload,
    }
  }

  /// Encodes the record: `{recLen:u32, type:u8, flags:u8, reserved:u16,
  /// txid:u64, payloadLen:u32}` + payload + `crc32c:u32`, padded to 8 bytes.
  pub fn encode(&self) -> Vec<u8> {
    let unpadded_len = WAL_RECORD_HEADER_SIZE + self.payload.len() + 4;
    let total_len = align_up(unpadded_len, WAL_RECORD_ALIGNMENT);

    let mut buf = Vec::with_capacity(total_len);
    write_u32(&mut buf, total_len as u32);
    buf.push(self.rec_type as u8);
    buf.push(self.flags);
    buf.extend_from_slice(&[0u8; 2]); // reserved
    write_u64(&mut buf, self.txid);
    write_u32(&mut buf, self.payload.len() as u32);
    buf.extend_from_slice(&self.payload);

    let crc = crc32c(&buf);
    write_u32(&mut buf, crc);
    buf.resize(total_len, 0);
    buf
  }

  /// Decodes one record starting at `buf[0..]`. Returns the record and the
  /// number of bytes consumed (the padded length), so callers can advance a
  /// cursor. A `recLen` of zero signals the logical end of written data
  /// within a circular WAL region.
  pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
    if buf.len() < WAL_RECORD_HEADER_SIZE {
      return Ok(None);
    }
    let rec_len = read_u32(buf, 0)? as usize;
    if rec_len == 0 {
      return Ok(None);
    }
    if rec_len < WAL_RECORD_HEADER_SIZE + 4 || rec_len > buf.len() {
      return Err(RayError::integrity("WAL record length out of range"));
    }
    let rec_type = buf[4];
    let flags = buf[5];
    let txid = read_u64(buf, 8)?;
    let payload_len = read_u32(buf, 16)? as usize;
    let payload_start = WAL_RECORD_HEADER_SIZE;
    let payload_end = payload_start + payload_len;
    if payload_end + 4 > rec_len {
      return Err(RayError::integrity("WAL record payload overruns record length"));
    }
    let stored_crc = read_u32(buf, payload_end)?;
    let computed_crc = crc32c(&buf[0..payload_end]);
    if stored_crc != computed_crc {
      return Err(RayError::integrity("WAL record CRC mismatch"));
    }
    let rec_type = WalRecordType::from_u8(rec_type)
      .ok_or_else(|| RayError::integrity(format!("unknown WAL record type {rec_type}")))?;
    let record = WalRecord {
      rec_type,
      flags,
      txid,
      payload: buf[payload_start..payload_end].to_vec(),
    };
    Ok(Some((record, rec_len)))
  }
}

// ============================================================================
// Payload encoding
// ============================================================================
//
// Varint/length-prefixed strings are used where natural; fixed fields are
// little-endian. These are the canonical payload layouts for the 16 record
// types, not stored anywhere else, so changing one changes on-disk format.

fn write_string(buf: &mut Vec<u8>, s: &str) {
  write_u32(buf, s.len() as u32);
  buf.extend_from_slice(s.as_bytes());
}

fn read_string(buf: &[u8], off: usize) -> Result<(String, usize)> {
  let len = read_u32(buf, off)? as usize;
  let start = off + 4;
  let end = start + len;
  let s = std::str::from_utf8(buf.get(start..end).ok_or_else(|| RayError::integrity("WAL payload truncated string"))?)
    .map_err(|_| RayError::integrity("WAL payload invalid utf8"))?
    .to_string();
  Ok((s, end))
}

fn write_prop_value(buf: &mut Vec<u8>, value: &PropValue) {
  match value {
    PropValue::Null => buf.push(PropValueTag::Null as u8),
    PropValue::Bool(b) => {
      buf.push(PropValueTag::Bool as u8);
      buf.push(*b as u8);
    }
    PropValue::I64(v) => {
      buf.push(PropValueTag::I64 as u8);
      write_i64(buf, *v);
    }
    PropValue::F64(v) => {
      buf.push(PropValueTag::F64 as u8);
      write_f64(buf, *v);
    }
    PropValue::String(s) => {
      buf.push(PropValueTag::String as u8);
      write_string(buf, s);
    }
  }
}

fn read_prop_value(buf: &[u8], off: usize) -> Result<(PropValue, usize)> {
  let tag = PropValueTag::from_u8(*buf.get(off).ok_or_else(|| RayError::integrity("WAL payload truncated prop tag"))?)
    .ok_or_else(|| RayError::integrity("WAL payload bad prop tag"))?;
  let body = off + 1;
  Ok(match tag {
    PropValueTag::Null => (PropValue::Null, body),
    PropValueTag::Bool => (PropValue::Bool(buf[body] != 0), body + 1),
    PropValueTag::I64 => (PropValue::I64(read_i64(buf, body)?), body + 8),
    PropValueTag::F64 => (PropValue::F64(read_f64(buf, body)?), body + 8),
    PropValueTag::String => {
      let (s, next) = read_string(buf, body)?;
      (PropValue::String(s), next)
    }
  })
}

pub fn build_begin_payload() -> Vec<u8> {
  Vec::new()
}

pub fn build_commit_payload() -> Vec<u8> {
  Vec::new()
}

pub fn build_rollback_payload() -> Vec<u8> {
  Vec::new()
}

pub fn build_create_node_payload(node_id: NodeId, key: Option<&str>) -> Vec<u8> {
  let mut buf = Vec::new();
  write_u64(&mut buf, node_id);
  match key {
    Some(k) => {
      buf.push(1);
      write_string(&mut buf, k);
    }
    None => buf.push(0),
  }
  buf
}

pub fn parse_create_node_payload(buf: &[u8]) -> Result<(NodeId, Option<String>)> {
  let node_id = read_u64(buf, 0)?;
  let has_key = *buf.get(8).unwrap_or(&0);
  let key = if has_key != 0 { Some(read_string(buf, 9)?.0) } else { None };
  Ok((node_id, key))
}

pub fn build_delete_node_payload(node_id: NodeId) -> Vec<u8> {
  let mut buf = Vec::new();
  write_u64(&mut buf, node_id);
  buf
}

pub fn parse_delete_node_payload(buf: &[u8]) -> Result<NodeId> {
  read_u64(buf, 0)
}

pub fn build_add_edge_payload(src: NodeId, etype: ETypeId, dst: NodeId) -> Vec<u8> {
  let mut buf = Vec::new();
  write_u64(&mut buf, src);
  write_u32(&mut buf, etype);
  write_u64(&mut buf, dst);
  buf
}

pub fn build_delete_edge_payload(src: NodeId, etype: ETypeId, dst: NodeId) -> Vec<u8> {
  build_add_edge_payload(src, etype, dst)
}

pub fn parse_edge_payload(buf: &[u8]) -> Result<(NodeId, ETypeId, NodeId)> {
  let src = read_u64(buf, 0)?;
  let etype = read_u32(buf, 8)?;
  let dst = read_u64(buf, 12)?;
  Ok((src, etype, dst))
}

pub fn build_define_label_payload(id: LabelId, name: &str) -> Vec<u8> {
  let mut buf = Vec::new();
  write_u32(&mut buf, id);
  write_string(&mut buf, name);
  buf
}

pub fn build_define_etype_payload(id: ETypeId, name: &str) -> Vec<u8> {
  build_define_label_payload(id, name)
}

pub fn build_define_propkey_payload(id: PropKeyId, name: &str) -> Vec<u8> {
  build_define_label_payload(id, name)
}

pub fn parse_define_payload(buf: &[u8]) -> Result<(u32, String)> {
  let id = read_u32(buf, 0)?;
  let (name, _) = read_string(buf, 4)?;
  Ok((id, name))
}

pub fn build_add_node_label_payload(node_id: NodeId, label_id: LabelId) -> Vec<u8> {
  let mut buf = Vec::new();
  write_u64(&mut buf, node_id);
  write_u32(&mut buf, label_id);
  buf
}

pub fn build_remove_node_label_payload(node_id: NodeId, label_id: LabelId) -> Vec<u8> {
  build_add_node_label_payload(node_id, label_id)
}

pub fn parse_node_label_payload(buf: &[u8]) -> Result<(NodeId, LabelId)> {
  let node_id = read_u64(buf, 0)?;
  let label_id = read_u32(buf, 8)?;
  Ok((node_id, label_id))
}

pub fn build_set_node_prop_payload(node_id: NodeId, key_id: PropKeyId, value: &PropValue) -> Vec<u8> {
  let mut buf = Vec::new();
  write_u64(&mut buf, node_id);
  write_u32(&mut buf, key_id);
  write_prop_value(&mut buf, value);
  buf
}

pub fn parse_set_node_prop_payload(buf: &[u8]) -> Result<(NodeId, PropKeyId, PropValue)> {
  let node_id = read_u64(buf, 0)?;
  let key_id = read_u32(buf, 8)?;
  let (value, _) = read_prop_value(buf, 12)?;
  Ok((node_id, key_id, value))
}

pub fn build_del_node_prop_payload(node_id: NodeId, key_id: PropKeyId) -> Vec<u8> {
  let mut buf = Vec::new();
  write_u64(&mut buf, node_id);
  write_u32(&mut buf, key_id);
  buf
}

pub fn parse_del_node_prop_payload(buf: &[u8]) -> Result<(NodeId, PropKeyId)> {
  let node_id = read_u64(buf, 0)?;
  let key_id = read_u32(buf, 8)?;
  Ok((node_id, key_id))
}

pub fn build_set_edge_prop_payload(src: NodeId, etype: ETypeId, dst: NodeId, key_id: PropKeyId, value: &PropValue) -> Vec<u8> {
  let mut buf = Vec::new();
  write_u64(&mut buf, src);
  write_u32(&mut buf, etype);
  write_u64(&mut buf, dst);
  write_u32(&mut buf, key_id);
  write_prop_value(&mut buf, value);
  buf
}

pub fn parse_set_edge_prop_payload(buf: &[u8]) -> Result<(NodeId, ETypeId, NodeId, PropKeyId, PropValue)> {
  let src = read_u64(buf, 0)?;
  let etype = read_u32(buf, 8)?;
  let dst = read_u64(buf, 12)?;
  let key_id = read_u32(buf, 20)?;
  let (value, _) = read_prop_value(buf, 24)?;
  Ok((src, etype, dst, key_id, value))
}

pub fn build_del_edge_prop_payload(src: NodeId, etype: ETypeId, dst: NodeId, key_id: PropKeyId) -> Vec<u8> {
  let mut buf = Vec::new();
  write_u64(&mut buf, src);
  write_u32(&mut buf, etype);
  write_u64(&mut buf, dst);
  write_u32(&mut buf, key_id);
  buf
}

pub fn parse_del_edge_prop_payload(buf: &[u8]) -> Result<(NodeId, ETypeId, NodeId, PropKeyId)> {
  let src = read_u64(buf, 0)?;
  let etype = read_u32(buf, 8)?;
  let dst = read_u64(buf, 12)?;
  let key_id = read_u32(buf, 20)?;
  Ok((src, etype, dst, key_id))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrip() {
    let rec = WalRecord::new(WalRecordType::CreateNode, 7, vec![1, 2, 3, 4]);
    let encoded = rec.encode();
    assert_eq!(encoded.len() % 8, 0);
    let (decoded, consumed) = WalRecord::decode(&encoded).unwrap().unwrap();
    assert_eq!(consumed, encoded.len());
    assert_eq!(decoded.txid, 7);
    assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
  }

  #[test]
  fn detects_corruption() {
    let rec = WalRecord::new(WalRecordType::Commit, 1, vec![]);
    let mut encoded = rec.encode();
    let last = encoded.len() - 1;
    encoded[last] ^= 0xFF;
    assert!(WalRecord::decode(&encoded).is_err());
  }

  #[test]
  fn zero_length_signals_end() {
    let buf = vec![0u8; 64];
    assert!(WalRecord::decode(&buf).unwrap().is_none());
  }

  #[test]
  fn create_node_payload_roundtrip() {
    let payload = build_create_node_payload(42, Some("alice"));
    let (node_id, key) = parse_create_node_payload(&payload).unwrap();
    assert_eq!(node_id, 42);
    assert_eq!(key.as_deref(), Some("alice"));

    let payload_no_key = build_create_node_payload(7, None);
    let (node_id2, key2) = parse_create_node_payload(&payload_no_key).unwrap();
    assert_eq!(node_id2, 7);
    assert!(key2.is_none());
  }

  #[test]
  fn set_node_prop_payload_roundtrip() {
    let payload = build_set_node_prop_payload(1, 2, &PropValue::String("hi".into()));
    let (node_id, key_id, value) = parse_set_node_prop_payload(&payload).unwrap();
    assert_eq!(node_id, 1);
    assert_eq!(key_id, 2);
    assert_eq!(value, PropValue::String("hi".into()));
  }
}
