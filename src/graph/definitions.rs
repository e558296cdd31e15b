//! Label, edge-type, and property-key definitions
//!
//! Unlike `GraphDB::get_or_create_label`/`get_or_create_etype`/`get_or_create_propkey`,
//! the functions here run inside a transaction and record a WAL entry, so a
//! new name survives a crash and replays on reopen (see `recovery::replay_wal_record`).

use crate::core::wal::record::*;
use crate::error::Result;
use crate::types::*;

use super::tx::TxHandle;

/// Define a label, allocating a fresh ID if the name is unknown.
/// Returns the existing ID if the label was already defined.
pub fn define_label(handle: &mut TxHandle, name: &str) -> Result<LabelId> {
  if let Some(id) = handle.db.get_label_id(name) {
    return Ok(id);
  }
  let id = handle.db.alloc_label_id();
  let payload = build_define_label_payload(id, name);
  handle.add_record(WalRecord::new(WalRecordType::DefineLabel, handle.txid(), payload))?;
  handle.db.register_label(id, name);
  Ok(id)
}

/// Define an edge type, allocating a fresh ID if the name is unknown.
pub fn define_etype(handle: &mut TxHandle, name: &str) -> Result<ETypeId> {
  if let Some(id) = handle.db.get_etype_id(name) {
    return Ok(id);
  }
  let id = handle.db.alloc_etype_id();
  let payload = build_define_etype_payload(id, name);
  handle.add_record(WalRecord::new(WalRecordType::DefineEtype, handle.txid(), payload))?;
  handle.db.register_etype(id, name);
  Ok(id)
}

/// Define a property key, allocating a fresh ID if the name is unknown.
pub fn define_propkey(handle: &mut TxHandle, name: &str) -> Result<PropKeyId> {
  if let Some(id) = handle.db.get_propkey_id(name) {
    return Ok(id);
  }
  let id = handle.db.alloc_propkey_id();
  let payload = build_define_propkey_payload(id, name);
  handle.add_record(WalRecord::new(WalRecordType::DefinePropkey, handle.txid(), payload))?;
  handle.db.register_propkey(id, name);
  Ok(id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::db::{close_graph_db, open_graph_db, OpenOptions};
  use crate::graph::tx::{begin_tx, commit};
  use tempfile::tempdir;

  #[test]
  fn test_define_label_is_idempotent() {
    let temp_dir = tempdir().unwrap();
    let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let id1 = define_label(&mut tx, "Person").unwrap();
    let id2 = define_label(&mut tx, "Person").unwrap();
    assert_eq!(id1, id2);
    commit(&mut tx).unwrap();

    close_graph_db(db).unwrap();
  }

  #[test]
  fn test_define_etype_and_propkey() {
    let temp_dir = tempdir().unwrap();
    let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    let etype_id = define_etype(&mut tx, "KNOWS").unwrap();
    let propkey_id = define_propkey(&mut tx, "name").unwrap();
    commit(&mut tx).unwrap();

    assert_eq!(db.get_etype_id("KNOWS"), Some(etype_id));
    assert_eq!(db.get_propkey_id("name"), Some(propkey_id));

    close_graph_db(db).unwrap();
  }
}
