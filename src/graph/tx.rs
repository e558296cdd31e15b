//! Transaction handling
//!
//! Provides begin, commit, and rollback operations for graph transactions.
//! All mutations happen within a transaction context.

use crate::core::wal::record::*;
use crate::error::{RayError, Result};
use crate::types::*;

use super::db::{GraphDB, TxState};

// ============================================================================
// Transaction Handle
// ============================================================================

/// Handle for an active transaction
pub struct TxHandle<'a> {
  /// Reference to the database
  pub db: &'a GraphDB,
  /// Transaction state
  pub tx: TxState,
  /// Whether the transaction has been committed or rolled back
  finished: bool,
}

impl<'a> TxHandle<'a> {
  /// Create a new transaction handle
  pub fn new(db: &'a GraphDB, tx: TxState) -> Self {
    Self {
      db,
      tx,
      finished: false,
    }
  }

  /// Get the transaction ID
  pub fn txid(&self) -> TxId {
    self.tx.txid
  }

  /// Check if this is a read-only transaction
  pub fn is_read_only(&self) -> bool {
    self.tx.read_only
  }

  /// Get the snapshot timestamp for MVCC reads
  pub fn snapshot_ts(&self) -> u64 {
    self.tx.snapshot_ts
  }

  /// Add a WAL record to this transaction
  pub fn add_record(&mut self, record: WalRecord) -> Result<()> {
    if self.tx.read_only {
      return Err(RayError::ReadOnly);
    }
    self.tx.wal_records.push(record);
    Ok(())
  }

  /// Check if the transaction is still active
  pub fn is_active(&self) -> bool {
    !self.finished
  }
}

// ============================================================================
// Transaction Operations
// ============================================================================

/// Begin a new transaction
pub fn begin_tx(db: &GraphDB) -> Result<TxHandle> {
  if db.read_only {
    return Err(RayError::ReadOnly);
  }

  // Check for existing transaction (single-writer model for now)
  {
    let current = db.current_tx.lock();
    if current.is_some() {
      return Err(RayError::TransactionInProgress);
    }
  }

  // Allocate transaction ID and snapshot timestamp. When MVCC is enabled the
  // MVCC manager's own counter is the WAL txid, kept in sync with the plain
  // `next_tx_id` counter so the two never collide.
  let (txid, snapshot_ts) = if let Some(mvcc) = db.mvcc.as_ref() {
    let (txid, snapshot_ts) = mvcc.tx_manager.lock().begin_tx();
    db.sync_tx_id_counter(txid);
    (txid, snapshot_ts)
  } else {
    (db.alloc_tx_id(), 0)
  };

  let tx = TxState::new(txid, false, snapshot_ts);

  // Set as current transaction
  {
    let mut current = db.current_tx.lock();
    *current = Some(TxState::new(txid, false, snapshot_ts));
  }

  Ok(TxHandle::new(db, tx))
}

/// Begin a read-only transaction
pub fn begin_read_tx(db: &GraphDB) -> Result<TxHandle> {
  let (txid, snapshot_ts) = if let Some(mvcc) = db.mvcc.as_ref() {
    let (txid, snapshot_ts) = mvcc.tx_manager.lock().begin_tx();
    db.sync_tx_id_counter(txid);
    (txid, snapshot_ts)
  } else {
    (db.alloc_tx_id(), 0)
  };

  let tx = TxState::new(txid, true, snapshot_ts);
  Ok(TxHandle::new(db, tx))
}

/// Commit a transaction
pub fn commit(handle: &mut TxHandle) -> Result<()> {
  if handle.finished {
    return Err(RayError::NoTransaction);
  }

  if handle.tx.read_only {
    // Read-only transactions just need to clean up
    if let Some(mvcc) = handle.db.mvcc.as_ref() {
      mvcc.tx_manager.lock().abort_tx(handle.tx.txid);
    }
    handle.finished = true;
    return Ok(());
  }

  // First-committer-wins check against this transaction's read and write
  // sets. Write-write conflicts can't arise under the single-writer model
  // enforced above, but a writer can still conflict with a concurrent
  // reader's snapshot via `begin_read_tx`.
  if let Some(mvcc) = handle.db.mvcc.as_ref() {
    let mut tx_mgr = mvcc.tx_manager.lock();
    if let Err(err) = mvcc.conflict_detector.validate_commit(&tx_mgr, handle.tx.txid) {
      tx_mgr.abort_tx(handle.tx.txid);
      let mut current = handle.db.current_tx.lock();
      *current = None;
      return Err(RayError::Conflict {
        txid: err.txid,
        keys: err.conflicting_keys,
      });
    }
  }

  // Build BEGIN record
  let begin_record = WalRecord::new(WalRecordType::Begin, handle.tx.txid, build_begin_payload());

  // Build COMMIT record
  let commit_record = WalRecord::new(
    WalRecordType::Commit,
    handle.tx.txid,
    build_commit_payload(),
  );

  // Collect all WAL records
  let mut all_records = Vec::with_capacity(handle.tx.wal_records.len() + 2);
  all_records.push(begin_record);
  all_records.append(&mut handle.tx.wal_records);
  all_records.push(commit_record);

  // Flush to WAL
  handle.db.flush_wal(&all_records)?;

  // Apply changes to delta
  // This happens by processing the WAL records we just wrote
  apply_records_to_delta(handle.db, &all_records)?;

  if let Some(mvcc) = handle.db.mvcc.as_ref() {
    mvcc
      .tx_manager
      .lock()
      .commit_tx(handle.tx.txid)
      .map_err(|e| RayError::Internal(e.to_string()))?;
  }

  // Clear current transaction
  {
    let mut current = handle.db.current_tx.lock();
    *current = None;
  }

  handle.finished = true;
  Ok(())
}

/// Rollback a transaction
pub fn rollback(handle: &mut TxHandle) -> Result<()> {
  if handle.finished {
    return Err(RayError::NoTransaction);
  }

  // Clear WAL records - nothing was written yet
  handle.tx.wal_records.clear();

  if let Some(mvcc) = handle.db.mvcc.as_ref() {
    mvcc.tx_manager.lock().abort_tx(handle.tx.txid);
  }

  // Clear current transaction
  if !handle.tx.read_only {
    let mut current = handle.db.current_tx.lock();
    *current = None;
  }

  handle.finished = true;
  Ok(())
}

/// Apply WAL records to the delta state
fn apply_records_to_delta(db: &GraphDB, records: &[WalRecord]) -> Result<()> {
  let mut delta = db.delta.write();

  for record in records {
    match record.rec_type {
      WalRecordType::Begin | WalRecordType::Commit | WalRecordType::Rollback => {
        // Control records don't affect delta
      }
      WalRecordType::CreateNode => {
        let (node_id, key) = parse_create_node_payload(&record.payload)?;
        delta.create_node(node_id, key.as_deref());
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
      WalRecordType::DefineLabel => {
        let (id, name) = parse_define_payload(&record.payload)?;
        delta.define_label(id, &name);
      }
      WalRecordType::DefineEtype => {
        let (id, name) = parse_define_payload(&record.payload)?;
        delta.define_etype(id, &name);
      }
      WalRecordType::DefinePropkey => {
        let (id, name) = parse_define_payload(&record.payload)?;
        delta.define_propkey(id, &name);
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
  }

  Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::db::{close_graph_db, open_graph_db, OpenOptions};
  use tempfile::tempdir;

  #[test]
  fn test_begin_tx() {
    let temp_dir = tempdir().unwrap();
    let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

    let tx = begin_tx(&db).unwrap();
    assert!(!tx.is_read_only());
    assert!(tx.is_active());

    // Should fail - transaction already in progress
    assert!(begin_tx(&db).is_err());

    close_graph_db(db).unwrap();
  }

  #[test]
  fn test_begin_read_tx() {
    let temp_dir = tempdir().unwrap();
    let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

    // Multiple read transactions should be allowed
    let tx1 = begin_read_tx(&db).unwrap();
    let tx2 = begin_read_tx(&db).unwrap();

    assert!(tx1.is_read_only());
    assert!(tx2.is_read_only());

    close_graph_db(db).unwrap();
  }

  #[test]
  fn test_commit_empty_tx() {
    let temp_dir = tempdir().unwrap();
    let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    commit(&mut tx).unwrap();

    assert!(!tx.is_active());

    close_graph_db(db).unwrap();
  }

  #[test]
  fn test_rollback() {
    let temp_dir = tempdir().unwrap();
    let db = open_graph_db(temp_dir.path(), OpenOptions::new()).unwrap();

    let mut tx = begin_tx(&db).unwrap();
    rollback(&mut tx).unwrap();

    assert!(!tx.is_active());

    // Should be able to start new transaction after rollback
    let tx2 = begin_tx(&db).unwrap();
    assert!(tx2.is_active());

    close_graph_db(db).unwrap();
  }
}
