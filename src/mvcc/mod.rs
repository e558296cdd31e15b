//! MVCC subsystem: transaction bookkeeping, per-entity version chains,
//! snapshot-isolation visibility, and background garbage collection.

pub mod gc;
pub mod tx_manager;
pub mod version_chain;
pub mod visibility;

use parking_lot::Mutex;

use crate::types::{TxId, TxKey};

use self::gc::GarbageCollector;
use self::tx_manager::TxManager;
use self::version_chain::VersionChainManager;

/// Reports a first-committer-wins conflict: the committing transaction and
/// the keys in its write set that a newer commit already touched.
#[derive(Debug, Clone)]
pub struct ConflictInfo {
  pub txid: TxId,
  pub conflicting_keys: Vec<TxKey>,
}

/// Read-only wrapper around `TxManager`'s commit-write index. Separated out
/// from `TxManager::commit_tx` so a transaction's conflict check can run
/// (and be reported with its own error shape) before the commit itself
/// mutates transaction state.
#[derive(Debug, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
  pub fn new() -> Self {
    Self
  }

  pub fn validate_commit(&self, tx_mgr: &TxManager, txid: TxId) -> Result<(), ConflictInfo> {
    tx_mgr.check_conflicts(txid).map_err(|conflicting_keys| ConflictInfo { txid, conflicting_keys })
  }
}

/// Bundles the three pieces of MVCC state a `SingleFileDB` needs: active
/// transaction tracking, per-entity version chains, and the background
/// garbage collector that reclaims both.
pub struct MvccManager {
  pub tx_manager: Mutex<TxManager>,
  pub version_chain: Mutex<VersionChainManager>,
  pub gc: Mutex<GarbageCollector>,
  pub conflict_detector: ConflictDetector,
}

impl MvccManager {
  pub fn new() -> Self {
    Self {
      tx_manager: Mutex::new(TxManager::new()),
      version_chain: Mutex::new(VersionChainManager::new()),
      gc: Mutex::new(GarbageCollector::new()),
      conflict_detector: ConflictDetector::new(),
    }
  }
}

impl Default for MvccManager {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::TxKey;

  #[test]
  fn conflict_detector_flags_overlapping_writes() {
    let mvcc = MvccManager::new();
    let (t1, _) = mvcc.tx_manager.lock().begin_tx();
    let (t2, _) = mvcc.tx_manager.lock().begin_tx();
    mvcc.tx_manager.lock().record_write(t1, TxKey::Node(1));
    mvcc.tx_manager.lock().record_write(t2, TxKey::Node(1));

    mvcc.tx_manager.lock().commit_tx(t1).unwrap();
    let err = mvcc
      .conflict_detector
      .validate_commit(&mvcc.tx_manager.lock(), t2)
      .unwrap_err();
    assert_eq!(err.txid, t2);
    assert_eq!(err.conflicting_keys, vec![TxKey::Node(1)]);
  }

  #[test]
  fn conflict_detector_passes_disjoint_writes() {
    let mvcc = MvccManager::new();
    let (t1, _) = mvcc.tx_manager.lock().begin_tx();
    let (t2, _) = mvcc.tx_manager.lock().begin_tx();
    mvcc.tx_manager.lock().record_write(t1, TxKey::Node(1));
    mvcc.tx_manager.lock().record_write(t2, TxKey::Node(2));

    mvcc.tx_manager.lock().commit_tx(t1).unwrap();
    assert!(mvcc
      .conflict_detector
      .validate_commit(&mvcc.tx_manager.lock(), t2)
      .is_ok());
  }
}
