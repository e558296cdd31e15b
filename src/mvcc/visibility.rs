//! Snapshot-isolation visibility rules layered over the version chains.
//!
//! A reader at `snapshot_ts` (optionally itself transaction `reader_txid`)
//! sees the newest version in a chain whose `commit_ts <= snapshot_ts`, or
//! whichever version was written by `reader_txid` itself (uncommitted reads
//! of one's own writes).

use crate::types::{Timestamp, TxId};

use super::version_chain::{EdgeVersion, NodeVersion, ValueVersion};

trait Versioned {
  fn txid(&self) -> TxId;
  fn commit_ts(&self) -> Timestamp;
  fn prev(&self) -> Option<&Self>;
}

impl Versioned for NodeVersion {
  fn txid(&self) -> TxId {
    self.txid
  }
  fn commit_ts(&self) -> Timestamp {
    self.commit_ts
  }
  fn prev(&self) -> Option<&Self> {
    self.prev.as_deref()
  }
}

impl Versioned for EdgeVersion {
  fn txid(&self) -> TxId {
    self.txid
  }
  fn commit_ts(&self) -> Timestamp {
    self.commit_ts
  }
  fn prev(&self) -> Option<&Self> {
    self.prev.as_deref()
  }
}

impl<V> Versioned for ValueVersion<V> {
  fn txid(&self) -> TxId {
    self.txid
  }
  fn commit_ts(&self) -> Timestamp {
    self.commit_ts
  }
  fn prev(&self) -> Option<&Self> {
    self.prev.as_deref()
  }
}

fn is_visible(txid: TxId, commit_ts: Timestamp, reader_txid: TxId, snapshot_ts: Timestamp) -> bool {
  txid == reader_txid || commit_ts <= snapshot_ts
}

/// Resolves the version visible to `(reader_txid, snapshot_ts)` starting at
/// `head`, walking `.prev` until one qualifies. `None` if the chain has no
/// version old enough (the entity didn't exist yet as of that snapshot).
pub fn get_visible_version<'a, T: Versioned>(head: &'a T, snapshot_ts: Timestamp, reader_txid: TxId) -> Option<&'a T> {
  let mut cur = Some(head);
  while let Some(node) = cur {
    if is_visible(node.txid(), node.commit_ts(), reader_txid, snapshot_ts) {
      return Some(node);
    }
    cur = node.prev();
  }
  None
}

/// Whether the node is visible (exists, as opposed to tombstoned) as of
/// `(reader_txid, snapshot_ts)`, given the chain head a caller already
/// looked up. `None` head means no MVCC history at all for that node.
pub fn node_exists(head: Option<&NodeVersion>, snapshot_ts: Timestamp, reader_txid: TxId) -> bool {
  head
    .and_then(|h| get_visible_version(h, snapshot_ts, reader_txid))
    .is_some_and(|v| v.data.is_some())
}

pub fn edge_exists(head: Option<&EdgeVersion>, snapshot_ts: Timestamp, reader_txid: TxId) -> bool {
  head
    .and_then(|h| get_visible_version(h, snapshot_ts, reader_txid))
    .is_some_and(|v| v.exists)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mvcc::version_chain::VersionChainManager;
  use crate::types::{NodeDelta, NodeVersionData};

  #[test]
  fn visible_version_picks_latest_committed() {
    let mut chain = VersionChainManager::new();
    chain.append_node_version(1, NodeVersionData { node_id: 1, delta: NodeDelta::default() }, 10, 100);
    chain.append_node_version(1, NodeVersionData { node_id: 1, delta: NodeDelta::default() }, 11, 200);

    let head = chain.get_node_version(1).unwrap();
    let v = get_visible_version(head, 150, 99).unwrap();
    assert_eq!(v.commit_ts, 100);

    let v2 = get_visible_version(head, 250, 99).unwrap();
    assert_eq!(v2.commit_ts, 200);
  }

  #[test]
  fn own_writes_visible_before_commit() {
    let mut chain = VersionChainManager::new();
    chain.append_node_version(1, NodeVersionData { node_id: 1, delta: NodeDelta::default() }, 5, u64::MAX);
    let head = chain.get_node_version(1).unwrap();
    let v = get_visible_version(head, 0, 5).unwrap();
    assert_eq!(v.txid, 5);
  }

  #[test]
  fn missing_chain_is_invisible() {
    let chain = VersionChainManager::new();
    assert!(!node_exists(chain.get_node_version(42), 1000, 1));
  }

  #[test]
  fn deleted_node_is_not_visible_as_existing() {
    let mut chain = VersionChainManager::new();
    chain.append_node_version(1, NodeVersionData { node_id: 1, delta: NodeDelta::default() }, 1, 10);
    chain.delete_node_version(1, 2, 20);
    let head = chain.get_node_version(1).unwrap();
    assert!(node_exists(Some(head), 15, 99));
    assert!(!node_exists(Some(head), 25, 99));
  }
}
