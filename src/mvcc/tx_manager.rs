//! Tracks active/committed transactions, assigns commit timestamps, and
//! detects first-committer-wins write-write conflicts via an inverted
//! commit-write index.

use std::collections::{HashMap, HashSet};

use crate::error::{RayError, Result};
use crate::types::{MvccTxStatus, Timestamp, TxId, TxKey};

#[derive(Debug, Clone, Copy, Default)]
pub struct CommittedWritesStats {
  /// Number of keys currently tracked in the commit-write index.
  pub size: usize,
  /// Transactions dropped from it by the last `cleanup_below` call's cohort.
  pub pruned: usize,
}

#[derive(Debug, Clone)]
pub struct TxInfo {
  pub txid: TxId,
  pub start_ts: Timestamp,
  pub commit_ts: Option<Timestamp>,
  pub status: MvccTxStatus,
  pub read_set: HashSet<TxKey>,
  pub write_set: HashSet<TxKey>,
}

/// Per-database MVCC bookkeeping. Never shared across database instances:
/// counters are local state, not process-global (multiple open databases in
/// one process must not interfere with each other's timestamps).
pub struct TxManager {
  next_txid: TxId,
  next_ts: Timestamp,
  txs: HashMap<TxId, TxInfo>,
  /// Inverted index: key -> (commit_ts, txid) pairs of committers, used to
  /// validate a committing transaction's write set against newer commits.
  commit_write_index: HashMap<TxKey, Vec<(Timestamp, TxId)>>,
  /// Cumulative count of transactions dropped by `cleanup_below`.
  cleaned_tx_count: usize,
  /// `(commitTs, wallClockMs)` in commit order, so a wall-clock retention
  /// window can be converted into the commitTs domain GC prunes in.
  commit_wall_log: Vec<(Timestamp, u64)>,
}

impl TxManager {
  pub fn new() -> Self {
    Self {
      next_txid: 1,
      next_ts: 1,
      txs: HashMap::new(),
      commit_write_index: HashMap::new(),
      cleaned_tx_count: 0,
      commit_wall_log: Vec::new(),
    }
  }

  pub fn next_commit_ts(&self) -> Timestamp {
    self.next_ts
  }

  pub fn get_next_commit_ts(&self) -> Timestamp {
    self.next_commit_ts()
  }

  pub fn get_active_count(&self) -> usize {
    self.active_count()
  }

  /// Read-only first-committer-wins check: would `txid`'s read or write set
  /// conflict with a commit that landed after it started? Doesn't mutate
  /// any state, unlike `commit_tx`'s own (redundant but harmless) check.
  pub fn check_conflicts(&self, txid: TxId) -> std::result::Result<(), Vec<TxKey>> {
    let Some(tx) = self.txs.get(&txid) else {
      return Ok(());
    };
    let conflicting: Vec<TxKey> = tx
      .write_set
      .iter()
      .chain(tx.read_set.iter())
      .filter(|key| {
        self
          .commit_write_index
          .get(*key)
          .is_some_and(|commits| commits.iter().any(|(commit_ts, other)| *other != txid && *commit_ts > tx.start_ts))
      })
      .cloned()
      .collect();
    if conflicting.is_empty() {
      Ok(())
    } else {
      Err(conflicting)
    }
  }

  /// Size of the commit-write index and how many stale transaction records
  /// `cleanup_below` has most recently reclaimed — surfaced via `DbStats`.
  pub fn get_committed_writes_stats(&self) -> CommittedWritesStats {
    CommittedWritesStats {
      size: self.commit_write_index.len(),
      pruned: self.cleaned_tx_count,
    }
  }

  pub fn begin_tx(&mut self) -> (TxId, Timestamp) {
    let txid = self.next_txid;
    self.next_txid += 1;
    let start_ts = self.next_ts;
    self.txs.insert(
      txid,
      TxInfo {
        txid,
        start_ts,
        commit_ts: None,
        status: MvccTxStatus::Active,
        read_set: HashSet::new(),
        write_set: HashSet::new(),
      },
    );
    (txid, start_ts)
  }

  pub fn record_read(&mut self, txid: TxId, key: TxKey) {
    if let Some(tx) = self.txs.get_mut(&txid) {
      tx.read_set.insert(key);
    }
  }

  pub fn record_write(&mut self, txid: TxId, key: TxKey) {
    if let Some(tx) = self.txs.get_mut(&txid) {
      tx.write_set.insert(key);
    }
  }

  pub fn get_tx(&self, txid: TxId) -> Option<&TxInfo> {
    self.txs.get(&txid)
  }

  /// Validates and commits `txid`: a conflict exists if any key in its read
  /// or write set was already committed by another transaction with
  /// `commit_ts > start_ts` (first-committer-wins).
  pub fn commit_tx(&mut self, txid: TxId) -> Result<Timestamp> {
    let start_ts = {
      let tx = self
        .txs
        .get(&txid)
        .ok_or_else(|| RayError::InvariantViolation(format!("commit of unknown tx {txid}")))?;
      tx.start_ts
    };

    let mut conflicting = Vec::new();
    {
      let tx = self.txs.get(&txid).unwrap();
      for key in tx.write_set.iter().chain(tx.read_set.iter()) {
        if let Some(commits) = self.commit_write_index.get(key) {
          if commits.iter().any(|(commit_ts, other)| *other != txid && *commit_ts > start_ts) {
            conflicting.push(key.clone());
          }
        }
      }
    }
    if !conflicting.is_empty() {
      let tx = self.txs.get_mut(&txid).unwrap();
      tx.status = MvccTxStatus::Aborted;
      return Err(RayError::Conflict {
        txid,
        keys: conflicting,
      });
    }

    let commit_ts = self.next_ts;
    self.next_ts += 1;
    let tx = self.txs.get_mut(&txid).unwrap();
    tx.commit_ts = Some(commit_ts);
    tx.status = MvccTxStatus::Committed;
    for key in tx.write_set.clone() {
      self
        .commit_write_index
        .entry(key)
        .or_default()
        .push((commit_ts, txid));
    }
    self.commit_wall_log.push((commit_ts, current_wall_ms()));
    Ok(commit_ts)
  }

  /// Largest `commitTs` whose commit happened at or before `wall_ms_cutoff`,
  /// i.e. a wall-clock retention cutoff converted into the commitTs domain
  /// GC horizons are expressed in. Returns 0 (nothing is that old yet) if no
  /// commit qualifies.
  pub fn commit_ts_before(&self, wall_ms_cutoff: u64) -> Timestamp {
    self
      .commit_wall_log
      .iter()
      .rev()
      .find(|&&(_, wall_ms)| wall_ms <= wall_ms_cutoff)
      .map(|&(ts, _)| ts)
      .unwrap_or(0)
  }

  pub fn abort_tx(&mut self, txid: TxId) {
    if let Some(tx) = self.txs.get_mut(&txid) {
      tx.status = MvccTxStatus::Aborted;
    }
  }

  pub fn remove_tx(&mut self, txid: TxId) {
    self.txs.remove(&txid);
  }

  pub fn active_count(&self) -> usize {
    self.txs.values().filter(|t| t.status == MvccTxStatus::Active).count()
  }

  pub fn has_active_readers(&self) -> bool {
    self.active_count() > 0
  }

  /// Lowest `start_ts` across still-active transactions, or `Timestamp::MAX`
  /// if there are none — chosen so callers can feed it straight into
  /// `.min(retention_ts)` without unwrapping an `Option`.
  pub fn min_active_ts(&self) -> Timestamp {
    self
      .txs
      .values()
      .filter(|t| t.status == MvccTxStatus::Active)
      .map(|t| t.start_ts)
      .min()
      .unwrap_or(Timestamp::MAX)
  }

  pub fn get_all_txs(&self) -> impl Iterator<Item = (&TxId, &TxInfo)> {
    self.txs.iter()
  }

  /// Drops fully-consumed (committed/aborted, below `horizon`) transactions
  /// and their commit-write-index entries so both maps stay bounded.
  pub fn cleanup_below(&mut self, horizon: Timestamp) -> usize {
    let stale: Vec<TxId> = self
      .txs
      .values()
      .filter(|t| t.status != MvccTxStatus::Active && t.commit_ts.map(|ts| ts < horizon).unwrap_or(true))
      .map(|t| t.txid)
      .collect();
    for txid in &stale {
      self.txs.remove(txid);
    }
    for commits in self.commit_write_index.values_mut() {
      commits.retain(|(_, txid)| !stale.contains(txid));
    }
    self.commit_write_index.retain(|_, v| !v.is_empty());
    self.commit_wall_log.retain(|(ts, _)| *ts >= horizon);
    self.cleaned_tx_count += stale.len();
    stale.len()
  }
}

fn current_wall_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

impl Default for TxManager {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::TxKey;

  #[test]
  fn first_committer_wins() {
    let mut mgr = TxManager::new();
    let (t1, _) = mgr.begin_tx();
    let (t2, _) = mgr.begin_tx();
    mgr.record_write(t1, TxKey::Node(5));
    mgr.record_write(t2, TxKey::Node(5));
    assert!(mgr.commit_tx(t1).is_ok());
    assert!(mgr.commit_tx(t2).is_err());
  }

  #[test]
  fn disjoint_writes_both_commit() {
    let mut mgr = TxManager::new();
    let (t1, _) = mgr.begin_tx();
    let (t2, _) = mgr.begin_tx();
    mgr.record_write(t1, TxKey::Node(1));
    mgr.record_write(t2, TxKey::Node(2));
    assert!(mgr.commit_tx(t1).is_ok());
    assert!(mgr.commit_tx(t2).is_ok());
  }

  #[test]
  fn min_active_ts_ignores_committed() {
    let mut mgr = TxManager::new();
    let (t1, start1) = mgr.begin_tx();
    mgr.commit_tx(t1).unwrap();
    let (_t2, start2) = mgr.begin_tx();
    assert_eq!(mgr.min_active_ts(), start2);
    assert!(start2 >= start1);
  }
}
