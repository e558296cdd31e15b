//! WAL scanning and redo recovery, run once at open time.
//!
//! A checkpoint flips `active_wal_region` and zeroes the other region's head
//! (see `core::wal::buffer`), so only the currently active region can hold
//! data written since the last checkpoint. Recovery therefore scans exactly
//! one region rather than both.

use std::collections::{HashMap, HashSet};

use crate::core::pager::FilePager;
use crate::core::wal::record::{
  parse_create_node_payload, parse_define_payload, parse_del_edge_prop_payload,
  parse_del_node_prop_payload, parse_delete_node_payload, parse_edge_payload,
  parse_node_label_payload, parse_set_edge_prop_payload, parse_set_node_prop_payload, WalRecord,
};
use crate::error::Result;
use crate::types::{DbHeaderV1, DeltaState, SchemaTables, TxId, WalRecordType};

/// Reads every record in the currently active WAL region, in write order.
pub fn scan_wal_records(pager: &mut FilePager, header: &DbHeaderV1) -> Result<Vec<WalRecord>> {
  let region_head = if header.active_wal_region == 0 {
    header.wal_primary_head
  } else {
    header.wal_secondary_head
  };
  if region_head == 0 {
    return Ok(Vec::new());
  }

  let region_base_page = if header.active_wal_region == 0 {
    header.wal_start_page
  } else {
    header.wal_start_page + header.primary_wal_page_count()
  };
  let region_page_count = if header.active_wal_region == 0 {
    header.primary_wal_page_count()
  } else {
    header.secondary_wal_page_count()
  };

  let bytes = pager.read_pages(region_base_page, region_page_count)?;
  let mut records = Vec::new();
  let mut offset = 0usize;
  while (offset as u64) < region_head {
    match WalRecord::decode(&bytes[offset..])? {
      Some((record, consumed)) => {
        records.push(record);
        offset += consumed;
      }
      None => break,
    }
  }
  Ok(records)
}

/// Groups scanned records by transaction, keeping only the ones that reached
/// a `Commit` record before the region's head. A transaction that was still
/// open (or explicitly rolled back) when the process died leaves no trace in
/// the replayed state, the same guarantee `Commit` gives at write time.
pub fn get_committed_transactions(records: &[WalRecord]) -> Vec<(TxId, Vec<WalRecord>)> {
  let mut order = Vec::new();
  let mut by_tx: HashMap<TxId, Vec<WalRecord>> = HashMap::new();
  let mut committed: HashSet<TxId> = HashSet::new();

  for record in records {
    match record.rec_type {
      WalRecordType::Begin => {
        if !by_tx.contains_key(&record.txid) {
          order.push(record.txid);
        }
        by_tx.entry(record.txid).or_default();
      }
      WalRecordType::Commit => {
        committed.insert(record.txid);
      }
      WalRecordType::Rollback => {
        by_tx.remove(&record.txid);
        committed.remove(&record.txid);
      }
      _ => {
        by_tx.entry(record.txid).or_default().push(record.clone());
      }
    }
  }

  order
    .into_iter()
    .filter(|txid| committed.contains(txid))
    .filter_map(|txid| by_tx.remove(&txid).map(|recs| (txid, recs)))
    .collect()
}

/// Applies one committed record's effect to the recovery-time delta overlay
/// and schema tables, and advances the relevant ID allocator past anything
/// the record names so newly-allocated IDs never collide with replayed ones.
pub fn replay_wal_record(
  record: &WalRecord,
  delta: &mut DeltaState,
  next_node_id: &mut u64,
  next_label_id: &mut u32,
  next_etype_id: &mut u32,
  next_propkey_id: &mut u32,
  schema: &mut SchemaTables,
) -> Result<()> {
  match record.rec_type {
    WalRecordType::Begin | WalRecordType::Commit | WalRecordType::Rollback => {}

    WalRecordType::CreateNode => {
      let (node_id, key) = parse_create_node_payload(&record.payload)?;
      delta.create_node(node_id, key.as_deref());
      if node_id >= *next_node_id {
        *next_node_id = node_id + 1;
      }
    }
    WalRecordType::DeleteNode => {
      let node_id = parse_delete_node_payload(&record.payload)?;
      delta.delete_node(node_id);
    }
    WalRecordType::AddEdge => {
      let (src, etype, dst) = parse_edge_payload(&record.payload)?;
      delta.add_edge(src, etype, dst);
    }
    WalRecordType::DeleteEdge => {
      let (src, etype, dst) = parse_edge_payload(&record.payload)?;
      delta.delete_edge(src, etype, dst);
    }

    WalRecordType::DefineLabel => {
      let (id, name) = parse_define_payload(&record.payload)?;
      schema.define_label(id, &name);
      if id >= *next_label_id {
        *next_label_id = id + 1;
      }
    }
    WalRecordType::DefineEtype => {
      let (id, name) = parse_define_payload(&record.payload)?;
      schema.define_etype(id, &name);
      if id >= *next_etype_id {
        *next_etype_id = id + 1;
      }
    }
    WalRecordType::DefinePropkey => {
      let (id, name) = parse_define_payload(&record.payload)?;
      schema.define_propkey(id, &name);
      if id >= *next_propkey_id {
        *next_propkey_id = id + 1;
      }
    }

    WalRecordType::AddNodeLabel => {
      let (node_id, label_id) = parse_node_label_payload(&record.payload)?;
      delta.add_node_label(node_id, label_id);
    }
    WalRecordType::RemoveNodeLabel => {
      let (node_id, label_id) = parse_node_label_payload(&record.payload)?;
      delta.remove_node_label(node_id, label_id);
    }

    WalRecordType::SetNodeProp => {
      let (node_id, key_id, value) = parse_set_node_prop_payload(&record.payload)?;
      delta.set_node_prop(node_id, key_id, value);
    }
    WalRecordType::DelNodeProp => {
      let (node_id, key_id) = parse_del_node_prop_payload(&record.payload)?;
      delta.delete_node_prop(node_id, key_id);
    }
    WalRecordType::SetEdgeProp => {
      let (src, etype, dst, key_id, value) = parse_set_edge_prop_payload(&record.payload)?;
      delta.set_edge_prop(src, etype, dst, key_id, value);
    }
    WalRecordType::DelEdgeProp => {
      let (src, etype, dst, key_id) = parse_del_edge_prop_payload(&record.payload)?;
      delta.delete_edge_prop(src, etype, dst, key_id);
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::wal::record::{build_begin_payload, build_commit_payload, build_create_node_payload};

  #[test]
  fn drops_uncommitted_transaction() {
    let begin = WalRecord::new(WalRecordType::Begin, 1, build_begin_payload());
    let create = WalRecord::new(WalRecordType::CreateNode, 1, build_create_node_payload(5, None));
    let records = vec![begin, create];
    assert!(get_committed_transactions(&records).is_empty());
  }

  #[test]
  fn keeps_committed_transaction_in_order() {
    let begin = WalRecord::new(WalRecordType::Begin, 1, build_begin_payload());
    let create = WalRecord::new(WalRecordType::CreateNode, 1, build_create_node_payload(5, None));
    let commit = WalRecord::new(WalRecordType::Commit, 1, build_commit_payload());
    let records = vec![begin, create, commit];
    let committed = get_committed_transactions(&records);
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].0, 1);
    assert_eq!(committed[0].1.len(), 1);
  }

  #[test]
  fn rollback_discards_transaction() {
    let begin = WalRecord::new(WalRecordType::Begin, 1, build_begin_payload());
    let create = WalRecord::new(WalRecordType::CreateNode, 1, build_create_node_payload(5, None));
    let rollback = WalRecord::new(WalRecordType::Rollback, 1, Vec::new());
    let records = vec![begin, create, rollback];
    assert!(get_committed_transactions(&records).is_empty());
  }

  #[test]
  fn replay_create_node_advances_allocator_and_delta() {
    let mut delta = DeltaState::new();
    let mut schema = SchemaTables::default();
    let (mut next_node, mut next_label, mut next_etype, mut next_propkey) = (1u64, 1u32, 1u32, 1u32);
    let record = WalRecord::new(WalRecordType::CreateNode, 1, build_create_node_payload(9, Some("k")));
    replay_wal_record(&record, &mut delta, &mut next_node, &mut next_label, &mut next_etype, &mut next_propkey, &mut schema).unwrap();
    assert!(delta.is_node_created(9));
    assert_eq!(next_node, 10);
  }
}
