//! Background garbage collection for MVCC version chains.
//!
//! Periodically prunes old versions that are no longer needed by any active transaction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::constants::{DEFAULT_GC_INTERVAL_MS, DEFAULT_MAX_CHAIN_DEPTH, DEFAULT_RETENTION_MS};
use crate::mvcc::tx_manager::TxManager;
use crate::mvcc::version_chain::VersionChainManager;
use crate::types::{MvccTxStatus, Timestamp};

// ============================================================================
// GC Statistics
// ============================================================================

/// GC statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
  /// Total versions pruned across all GC runs
  pub versions_pruned: u64,
  /// Total chains truncated across all GC runs
  pub chains_truncated: u64,
  /// Number of GC runs executed
  pub gc_runs: u64,
  /// Timestamp of last GC run (milliseconds since epoch)
  pub last_gc_time: u64,
  /// Total transactions cleaned up
  pub txs_cleaned: u64,
}

// ============================================================================
// Garbage Collector
// ============================================================================

/// Configuration for the garbage collector
#[derive(Debug, Clone)]
pub struct GcConfig {
  /// Interval between GC runs in milliseconds
  pub interval_ms: u64,
  /// Retention period - versions younger than this are kept even if not needed
  pub retention_ms: u64,
  /// Maximum chain depth before truncation
  pub max_chain_depth: usize,
}

impl Default for GcConfig {
  fn default() -> Self {
    Self {
      interval_ms: DEFAULT_GC_INTERVAL_MS,
      retention_ms: DEFAULT_RETENTION_MS,
      max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
    }
  }
}

/// Garbage collector for MVCC version chains
///
/// The GC is responsible for:
/// 1. Pruning old versions that are no longer visible to any active transaction
/// 2. Truncating deep version chains to bound traversal time
/// 3. Cleaning up committed transaction metadata
///
/// The GC can run in two modes:
/// 1. Manual: Call `run_gc()` explicitly when needed
/// 2. Background: Use with a timer/scheduler (not included - async runtime dependent)
#[derive(Debug)]
pub struct GarbageCollector {
  /// Configuration
  config: GcConfig,
  /// Statistics
  stats: GcStats,
  /// Whether GC is currently running
  running: AtomicBool,
  /// Last run timestamp (for rate limiting)
  last_run: Option<Instant>,
}

impl GarbageCollector {
  /// Create a new garbage collector with default config
  pub fn new() -> Self {
    Self::with_config(GcConfig::default())
  }

  /// Create a new garbage collector with custom config
  pub fn with_config(config: GcConfig) -> Self {
    Self {
      config,
      stats: GcStats::default(),
      running: AtomicBool::new(false),
      last_run: None,
    }
  }

  /// Get the configuration
  pub fn config(&self) -> &GcConfig {
    &self.config
  }

  /// Update the configuration
  pub fn set_config(&mut self, config: GcConfig) {
    self.config = config;
  }

  /// Run a single GC cycle
  ///
  /// This is the main entry point for garbage collection.
  /// It can be called manually or by a background scheduler.
  ///
  /// Returns the number of versions pruned in this cycle.
  pub fn run_gc(
    &mut self,
    tx_manager: &mut TxManager,
    version_chain: &mut VersionChainManager,
  ) -> GcResult {
    // Prevent concurrent GC runs
    if self.running.swap(true, Ordering::SeqCst) {
      return GcResult {
        versions_pruned: 0,
        chains_truncated: 0,
        txs_cleaned: 0,
        skipped: true,
      };
    }

    let result = self.do_gc(tx_manager, version_chain);

    self.running.store(false, Ordering::SeqCst);
    self.last_run = Some(Instant::now());

    result
  }

  /// Internal GC implementation
  fn do_gc(
    &mut self,
    tx_manager: &mut TxManager,
    version_chain: &mut VersionChainManager,
  ) -> GcResult {
    // Calculate GC horizon, entirely in the commitTs domain version chains
    // are keyed by (prune/truncate compare against `commit_ts`, not wall time).
    let now = current_time_ms();
    let min_active_ts = tx_manager.min_active_ts();
    let retention_cutoff_wall = now.saturating_sub(self.config.retention_ms);
    let retention_ts = tx_manager.commit_ts_before(retention_cutoff_wall);

    // GC horizon is the minimum of:
    // 1. Oldest active transaction snapshot (can't prune versions needed by active reads)
    // 2. Retention period, converted from wall-clock ms into the commitTs that
    //    was current `retention_ms` ago (keep versions for at least that long)
    let horizon_ts = min_active_ts.min(retention_ts);

    // Prune old versions
    let pruned = version_chain.prune_old_versions(horizon_ts);

    // Truncate deep chains (bounds worst-case traversal time)
    let truncated =
      version_chain.truncate_deep_chains(self.config.max_chain_depth, Some(min_active_ts));

    // Clean up old committed transactions
    let txs_cleaned = self.cleanup_old_transactions(tx_manager, horizon_ts);

    // Update stats
    self.stats.versions_pruned += pruned as u64;
    self.stats.chains_truncated += truncated as u64;
    self.stats.txs_cleaned += txs_cleaned as u64;
    self.stats.gc_runs += 1;
    self.stats.last_gc_time = now;

    GcResult {
      versions_pruned: pruned,
      chains_truncated: truncated,
      txs_cleaned,
      skipped: false,
    }
  }

  /// Clean up committed transactions that are older than the horizon
  /// These transactions are no longer needed for visibility calculations
  fn cleanup_old_transactions(&self, tx_manager: &mut TxManager, horizon_ts: Timestamp) -> usize {
    let txs_to_remove: Vec<_> = tx_manager
      .get_all_txs()
      .filter(|(_, tx)| {
        tx.status == MvccTxStatus::Committed
          && tx.commit_ts.is_some()
          && tx.commit_ts.unwrap() < horizon_ts
      })
      .map(|(&txid, _)| txid)
      .collect();

    let count = txs_to_remove.len();

    // Remove in a separate loop to avoid iterator invalidation
    for txid in txs_to_remove {
      tx_manager.remove_tx(txid);
    }

    count
  }

  /// Check if enough time has passed since last GC run
  pub fn should_run(&self) -> bool {
    match self.last_run {
      None => true,
      Some(last) => last.elapsed() >= Duration::from_millis(self.config.interval_ms),
    }
  }

  /// Force a GC run (for testing/manual triggers)
  /// Returns the total number of versions pruned across all runs
  pub fn force_gc(
    &mut self,
    tx_manager: &mut TxManager,
    version_chain: &mut VersionChainManager,
  ) -> usize {
    let result = self.run_gc(tx_manager, version_chain);
    result.versions_pruned
  }

  /// Get GC statistics
  pub fn get_stats(&self) -> GcStats {
    self.stats.clone()
  }

  /// Reset statistics
  pub fn reset_stats(&mut self) {
    self.stats = GcStats::default();
  }

  /// Check if GC is currently running
  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }
}

impl Default for GarbageCollector {
  fn default() -> Self {
    Self::new()
  }
}

/// Result of a single GC cycle
#[derive(Debug, Clone, Default)]
pub struct GcResult {
  /// Number of versions pruned
  pub versions_pruned: usize,
  /// Number of chains truncated
  pub chains_truncated: usize,
  /// Number of transactions cleaned up
  pub txs_cleaned: usize,
  /// Whether the GC run was skipped (e.g., already running)
  pub skipped: bool,
}

// ============================================================================
// Shared GC (for background threads)
// ============================================================================

/// Shared state for background GC
///
/// This can be used to signal a background GC thread to stop.
#[derive(Debug)]
pub struct SharedGcState {
  /// Signal to stop the GC thread
  pub stop_signal: AtomicBool,
  /// Versions pruned (can be read from another thread)
  pub versions_pruned: AtomicU64,
  /// GC runs count
  pub gc_runs: AtomicU64,
}

impl SharedGcState {
  pub fn new() -> Self {
    Self {
      stop_signal: AtomicBool::new(false),
      versions_pruned: AtomicU64::new(0),
      gc_runs: AtomicU64::new(0),
    }
  }

  pub fn stop(&self) {
    self.stop_signal.store(true, Ordering::SeqCst);
  }

  pub fn should_stop(&self) -> bool {
    self.stop_signal.load(Ordering::SeqCst)
  }

  pub fn record_gc_run(&self, pruned: u64) {
    self.versions_pruned.fetch_add(pruned, Ordering::Relaxed);
    self.gc_runs.fetch_add(1, Ordering::Relaxed);
  }
}

impl Default for SharedGcState {
  fn default() -> Self {
    Self::new()
  }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Get current time in milliseconds (since some epoch)
/// Note: This is a simple implementation. In production, you might want to use
/// std::time::SystemTime or a more precise clock.
fn current_time_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{NodeDelta, NodeVersionData};

  fn setup() -> (TxManager, VersionChainManager, GarbageCollector) {
    let tx_mgr = TxManager::new();
    let version_chain = VersionChainManager::new();
    let gc = GarbageCollector::new();
    (tx_mgr, version_chain, gc)
  }

  #[test]
  fn test_gc_new() {
    let gc = GarbageCollector::new();
    assert_eq!(gc.config.interval_ms, DEFAULT_GC_INTERVAL_MS);
    assert_eq!(gc.config.retention_ms, DEFAULT_RETENTION_MS);
    assert_eq!(gc.config.max_chain_depth, DEFAULT_MAX_CHAIN_DEPTH);
  }

  #[test]
  fn test_gc_with_config() {
    let config = GcConfig {
      interval_ms: 1000,
      retention_ms: 5000,
      max_chain_depth: 5,
    };
    let gc = GarbageCollector::with_config(config.clone());
    assert_eq!(gc.config.interval_ms, 1000);
    assert_eq!(gc.config.retention_ms, 5000);
    assert_eq!(gc.config.max_chain_depth, 5);
  }

  #[test]
  fn test_gc_run_empty() {
    let (mut tx_mgr, mut version_chain, mut gc) = setup();

    let result = gc.run_gc(&mut tx_mgr, &mut version_chain);
    assert!(!result.skipped);
    assert_eq!(result.versions_pruned, 0);
    assert_eq!(result.chains_truncated, 0);
  }

  #[test]
  fn test_gc_prunes_old_versions() {
    let (mut tx_mgr, mut version_chain, mut gc) = setup();

    // Use very short retention for testing
    gc.config.retention_ms = 0;

    // Create some old versions with old timestamps
    for i in 1..=5 {
      let data = NodeVersionData {
        node_id: 1,
        delta: NodeDelta::default(),
      };
      // Use timestamp 1-5 which is definitely old
      version_chain.append_node_version(1, data, i, i);
    }

    let result = gc.run_gc(&mut tx_mgr, &mut version_chain);

    // Stats should be updated
    assert!(gc.stats.gc_runs > 0);
  }

  #[test]
  fn test_gc_respects_active_transactions() {
    let (mut tx_mgr, mut version_chain, mut gc) = setup();
    gc.config.retention_ms = 0;

    // Start a transaction (creates snapshot at ts=1)
    let (_txid, _start_ts) = tx_mgr.begin_tx();

    // Create version at ts=1 (should be preserved for the active tx)
    let data = NodeVersionData {
      node_id: 1,
      delta: NodeDelta::default(),
    };
    version_chain.append_node_version(1, data, 1, 1);

    // GC should respect the active transaction's snapshot
    let result = gc.run_gc(&mut tx_mgr, &mut version_chain);

    // Version at ts=1 should still exist because there's an active tx
    assert!(version_chain.get_node_version(1).is_some());
  }

  #[test]
  fn test_gc_truncates_deep_chains() {
    let (mut tx_mgr, mut version_chain, mut gc) = setup();
    gc.config.max_chain_depth = 3;
    gc.config.retention_ms = u64::MAX; // Don't prune by time

    // Create a deep chain
    for i in 1..=10 {
      let data = NodeVersionData {
        node_id: 1,
        delta: NodeDelta::default(),
      };
      // Use future timestamps so they won't be pruned
      version_chain.append_node_version(1, data, i, u64::MAX - i);
    }

    let result = gc.run_gc(&mut tx_mgr, &mut version_chain);

    // Chain should be truncated
    let mut depth = 0;
    let mut current = version_chain.get_node_version(1);
    while let Some(v) = current {
      depth += 1;
      current = v.prev.as_deref();
    }
    assert!(depth <= gc.config.max_chain_depth + 1);
  }

  #[test]
  fn test_gc_cleans_committed_transactions() {
    let (mut tx_mgr, mut version_chain, mut gc) = setup();
    gc.config.retention_ms = 0;

    // Create and commit transactions
    for _ in 0..5 {
      let (txid, _) = tx_mgr.begin_tx();
      tx_mgr.commit_tx(txid).unwrap();
    }

    // Start another transaction to prevent eager cleanup
    let (_txid, _) = tx_mgr.begin_tx();

    // Run GC - committed transactions with old timestamps should be cleaned
    let result = gc.run_gc(&mut tx_mgr, &mut version_chain);

    // Some transactions might be cleaned
    assert!(gc.stats.gc_runs > 0);
  }

  #[test]
  fn test_gc_stats() {
    let (mut tx_mgr, mut version_chain, mut gc) = setup();

    gc.run_gc(&mut tx_mgr, &mut version_chain);
    gc.run_gc(&mut tx_mgr, &mut version_chain);
    gc.run_gc(&mut tx_mgr, &mut version_chain);

    let stats = gc.get_stats();
    assert_eq!(stats.gc_runs, 3);
  }

  #[test]
  fn test_gc_reset_stats() {
    let (mut tx_mgr, mut version_chain, mut gc) = setup();

    gc.run_gc(&mut tx_mgr, &mut version_chain);
    gc.reset_stats();

    let stats = gc.get_stats();
    assert_eq!(stats.gc_runs, 0);
    assert_eq!(stats.versions_pruned, 0);
  }

  #[test]
  fn test_should_run() {
    let gc = GarbageCollector::new();

    // Should run on first call
    assert!(gc.should_run());
  }

  #[test]
  fn test_is_running() {
    let gc = GarbageCollector::new();
    assert!(!gc.is_running());
  }

  #[test]
  fn test_shared_gc_state() {
    let state = SharedGcState::new();

    assert!(!state.should_stop());

    state.record_gc_run(10);
    assert_eq!(state.versions_pruned.load(Ordering::Relaxed), 10);
    assert_eq!(state.gc_runs.load(Ordering::Relaxed), 1);

    state.stop();
    assert!(state.should_stop());
  }

  #[test]
  fn test_gc_result_default() {
    let result = GcResult::default();
    assert_eq!(result.versions_pruned, 0);
    assert_eq!(result.chains_truncated, 0);
    assert_eq!(result.txs_cleaned, 0);
    assert!(!result.skipped);
  }

  #[test]
  fn test_gc_config_default() {
    let config = GcConfig::default();
    assert_eq!(config.interval_ms, DEFAULT_GC_INTERVAL_MS);
    assert_eq!(config.retention_ms, DEFAULT_RETENTION_MS);
    assert_eq!(config.max_chain_depth, DEFAULT_MAX_CHAIN_DEPTH);
  }

  #[test]
  fn test_force_gc() {
    let (mut tx_mgr, mut version_chain, mut gc) = setup();

    let pruned = gc.force_gc(&mut tx_mgr, &mut version_chain);

    // Even with no versions, force_gc should run
    assert!(gc.stats.gc_runs > 0);
  }

  #[test]
  fn test_set_config() {
    let mut gc = GarbageCollector::new();

    let new_config = GcConfig {
      interval_ms: 100,
      retention_ms: 200,
      max_chain_depth: 3,
    };
    gc.set_config(new_config);

    assert_eq!(gc.config().interval_ms, 100);
    assert_eq!(gc.config().retention_ms, 200);
    assert_eq!(gc.config().max_chain_depth, 3);
  }
}
