//! Single-file compactor and vacuum operations.

use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::pager::{pages_to_store, FilePager};
use crate::core::snapshot::reader::{ParseSnapshotOptions, SnapshotData};
use crate::core::snapshot::writer::{build_snapshot_to_memory, EdgeInput, NodeInput, SnapshotBuildInput};
use crate::core::wal::buffer::WalBuffer;
use crate::error::{RayError, Result};
use crate::types::{ETypeId, LabelId, PropKeyId};

use super::{CheckpointStatus, SingleFileDB};

/// Options for single-file optimize operation
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleFileOptimizeOptions {}

/// Options for vacuum operation
#[derive(Debug, Clone)]
pub struct VacuumOptions {
  /// Shrink WAL region if empty
  pub shrink_wal: bool,
  /// Minimum WAL size to keep (bytes)
  pub min_wal_size: Option<u64>,
}

/// Options for resizing WAL region
#[derive(Debug, Clone)]
pub struct ResizeWalOptions {
  /// Allow shrinking WAL size (default false)
  pub allow_shrink: bool,
  /// Perform a checkpoint before resizing (default true)
  pub checkpoint: bool,
}

impl Default for ResizeWalOptions {
  fn default() -> Self {
    Self {
      allow_shrink: false,
      checkpoint: true,
    }
  }
}

impl Default for VacuumOptions {
  fn default() -> Self {
    Self {
      shrink_wal: true,
      min_wal_size: None,
    }
  }
}

/// Minimum WAL pages to keep (64KB at 4KB page size)
const MIN_WAL_PAGES: u64 = 16;

impl SingleFileDB {
  /// Optimize (compact) a single-file database.
  ///
  /// This merges snapshot + delta into a new snapshot and clears WAL.
  pub fn optimize_single_file(&self, options: Option<SingleFileOptimizeOptions>) -> Result<()> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }

    if self.has_any_transaction() {
      return Err(RayError::TransactionInProgress);
    }

    if self.is_checkpoint_running() {
      // Wait for the in-flight checkpoint to finish before starting another.
      while self.is_checkpoint_running() {
        std::thread::sleep(std::time::Duration::from_millis(1));
      }
    }

    let (nodes, edges, labels, etypes, propkeys) = self.collect_graph_data();

    let header = self.header.read().clone();
    let old_snapshot_start_page = header.snapshot_start_page;
    let old_snapshot_page_count = header.snapshot_page_count;
    let new_gen = header.active_snapshot_gen + 1;
    let _ = options;

    let snapshot_buffer = build_snapshot_to_memory(SnapshotBuildInput {
      generation: new_gen,
      created_unix_ns: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0),
      nodes,
      edges,
      labels,
      etypes,
      propkeys,
    })?;

    let wal_end_page = header.wal_start_page + header.wal_page_count;
    let new_snapshot_start_page = wal_end_page;
    let new_snapshot_page_count =
      pages_to_store(snapshot_buffer.len(), header.page_size as usize) as u64;

    {
      let mut pager = self.pager.lock();
      self.write_snapshot_pages(
        &mut pager,
        new_snapshot_start_page as u32,
        &snapshot_buffer,
        header.page_size as usize,
      )?;
    }

    {
      let mut pager = self.pager.lock();
      let mut wal_buffer = self.wal_buffer.lock();
      let mut header = self.header.write();

      header.active_snapshot_gen = new_gen;
      header.snapshot_start_page = new_snapshot_start_page;
      header.snapshot_page_count = new_snapshot_page_count;
      header.db_size_pages = new_snapshot_start_page + new_snapshot_page_count;
      header.max_node_id = self.next_node_id.load(Ordering::SeqCst).saturating_sub(1);
      header.next_tx_id = self.next_tx_id.load(Ordering::SeqCst);

      header.wal_head = 0;
      header.wal_tail = 0;
      header.active_wal_region = 0;
      header.wal_primary_head = 0;
      header.wal_secondary_head = 0;
      wal_buffer.reset();

      header.change_counter += 1;

      let header_bytes = header.serialize_to_page();
      pager.write_page(0, &header_bytes)?;
      pager.sync()?;

      // The old snapshot's pages stay allocated past the new db_size_pages
      // boundary; `vacuum_single_file` reclaims that tail with `truncate_pages`.
      let _ = (old_snapshot_start_page, old_snapshot_page_count, new_snapshot_start_page);
    }

    self.delta.write().clear();
    self.reload_snapshot()?;

    Ok(())
  }

  /// Vacuum operation - shrink file by reclaiming free pages.
  pub fn vacuum_single_file(&self, options: Option<VacuumOptions>) -> Result<()> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }

    if self.has_any_transaction() {
      return Err(RayError::TransactionInProgress);
    }

    let options = options.unwrap_or_default();

    let mut new_header = self.header.read().clone();
    let page_size = new_header.page_size as u64;

    let min_wal_pages = if let Some(min_wal_size) = options.min_wal_size {
      min_wal_size.div_ceil(page_size)
    } else {
      MIN_WAL_PAGES
    };

    let wal_is_empty = new_header.wal_head == new_header.wal_tail
      || (new_header.wal_head == 0 && new_header.wal_tail == 0);
    let can_shrink_wal =
      options.shrink_wal && wal_is_empty && new_header.wal_page_count > min_wal_pages;

    if new_header.snapshot_page_count == 0 && !can_shrink_wal {
      return Ok(());
    }

    let new_wal_page_count = if can_shrink_wal {
      min_wal_pages
    } else {
      new_header.wal_page_count
    };
    let new_wal_end_page = new_header.wal_start_page + new_wal_page_count;

    if new_header.snapshot_page_count > 0 {
      let current_snapshot_start = new_header.snapshot_start_page;
      let new_snapshot_start = new_wal_end_page;

      if current_snapshot_start != new_snapshot_start {
        let snapshot_bytes = {
          let mut pager = self.pager.lock();
          pager.read_pages(current_snapshot_start, new_header.snapshot_page_count)?
        };

        let mut pager = self.pager.lock();
        self.write_snapshot_pages(
          &mut pager,
          new_snapshot_start as u32,
          &snapshot_bytes,
          new_header.page_size as usize,
        )?;
      }

      new_header.snapshot_start_page = new_snapshot_start;
    }

    if can_shrink_wal {
      new_header.wal_page_count = new_wal_page_count;
    }

    new_header.db_size_pages = if new_header.snapshot_page_count > 0 {
      new_header.snapshot_start_page + new_header.snapshot_page_count
    } else {
      new_header.wal_start_page + new_header.wal_page_count
    };
    new_header.change_counter += 1;

    {
      let mut pager = self.pager.lock();
      let header_bytes = new_header.serialize_to_page();
      pager.write_page(0, &header_bytes)?;
      pager.sync()?;
      pager.truncate_pages(new_header.db_size_pages as u32)?;
    }

    let new_wal_buffer = WalBuffer::from_header(&new_header);

    {
      let mut header_guard = self.header.write();
      *header_guard = new_header;
    }

    {
      let mut wal_buffer = self.wal_buffer.lock();
      *wal_buffer = new_wal_buffer;
    }

    self.reload_snapshot()?;

    Ok(())
  }

  /// Resize the WAL region (single-file only).
  ///
  /// This operation is offline (no active transactions). By default it
  /// checkpoints to clear WAL before resizing.
  pub fn resize_wal(&self, wal_size_bytes: usize, options: Option<ResizeWalOptions>) -> Result<()> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }

    if self.has_any_transaction() {
      return Err(RayError::TransactionInProgress);
    }

    if self.is_checkpoint_running() {
      while self.is_checkpoint_running() {
        std::thread::sleep(std::time::Duration::from_millis(1));
      }
    }

    let options = options.unwrap_or_default();

    if wal_size_bytes == 0 {
      return Err(RayError::Internal("WAL size must be > 0".to_string()));
    }

    if options.checkpoint {
      self.checkpoint()?;
    }

    let header = self.header.read().clone();
    let wal_is_empty =
      header.wal_head == header.wal_tail || (header.wal_head == 0 && header.wal_tail == 0);
    if !wal_is_empty {
      return Err(RayError::Internal(
        "WAL must be empty before resize (run checkpoint)".to_string(),
      ));
    }

    let new_wal_page_count = pages_to_store(wal_size_bytes, header.page_size as usize) as u64;

    if new_wal_page_count < MIN_WAL_PAGES {
      return Err(RayError::Internal(format!(
        "WAL size too small: minimum is {MIN_WAL_PAGES} pages"
      )));
    }

    if new_wal_page_count < header.wal_page_count && !options.allow_shrink {
      return Err(RayError::Internal(
        "WAL shrink requires allow_shrink=true".to_string(),
      ));
    }

    if new_wal_page_count == header.wal_page_count {
      return Ok(());
    }

    let mut new_header = header.clone();
    let new_wal_end_page = new_header.wal_start_page + new_wal_page_count;

    if new_header.snapshot_page_count > 0 {
      let current_snapshot_start = new_header.snapshot_start_page;
      if current_snapshot_start != new_wal_end_page {
        let snapshot_bytes = {
          let mut pager = self.pager.lock();
          pager.read_pages(current_snapshot_start, new_header.snapshot_page_count)?
        };

        let mut pager = self.pager.lock();
        self.write_snapshot_pages(
          &mut pager,
          new_wal_end_page as u32,
          &snapshot_bytes,
          new_header.page_size as usize,
        )?;
      }

      new_header.snapshot_start_page = new_wal_end_page;
    }

    new_header.wal_page_count = new_wal_page_count;
    new_header.wal_head = 0;
    new_header.wal_tail = 0;
    new_header.wal_primary_head = 0;
    new_header.wal_secondary_head = 0;
    new_header.active_wal_region = 0;
    new_header.checkpoint_in_progress = false;

    new_header.db_size_pages = if new_header.snapshot_page_count > 0 {
      new_header.snapshot_start_page + new_header.snapshot_page_count
    } else {
      new_header.wal_start_page + new_header.wal_page_count
    };
    new_header.change_counter += 1;

    {
      let mut pager = self.pager.lock();
      let header_bytes = new_header.serialize_to_page();
      pager.write_page(0, &header_bytes)?;
      pager.sync()?;
      if new_header.db_size_pages < header.db_size_pages {
        pager.truncate_pages(new_header.db_size_pages as u32)?;
      }
    }

    let new_wal_buffer = WalBuffer::from_header(&new_header);

    {
      let mut header_guard = self.header.write();
      *header_guard = new_header;
    }

    {
      let mut wal_buffer = self.wal_buffer.lock();
      *wal_buffer = new_wal_buffer;
    }

    self.reload_snapshot()?;

    Ok(())
  }

  /// Whether any thread currently holds an open transaction against this
  /// handle. Offline maintenance (optimize/vacuum/resize) refuses to run
  /// while one is in flight.
  pub fn has_any_transaction(&self) -> bool {
    !self.current_tx.lock().is_empty()
  }

  pub fn is_checkpoint_running(&self) -> bool {
    *self.checkpoint_status.lock() == CheckpointStatus::Running
  }

  /// Fraction of the active WAL region's capacity currently in use, compared
  /// against `threshold`. Used both as the auto-checkpoint trigger and as the
  /// `recommend_compact` hint in `DbStats`.
  pub fn should_checkpoint(&self, threshold: f64) -> bool {
    let header = self.header.read();
    let region_pages = if header.active_wal_region == 0 {
      header.primary_wal_page_count()
    } else {
      header.secondary_wal_page_count()
    };
    let capacity = region_pages * header.page_size as u64;
    if capacity == 0 {
      return false;
    }
    let used = self.wal_stats().used;
    (used as f64 / capacity as f64) >= threshold
  }

  /// Merges snapshot + delta into a fresh snapshot and clears the WAL,
  /// blocking the caller until it completes.
  pub fn checkpoint(&self) -> Result<()> {
    *self.checkpoint_status.lock() = CheckpointStatus::Running;
    let result = self.optimize_single_file(None);
    *self.checkpoint_status.lock() = CheckpointStatus::Idle;
    result
  }

  /// Runs a checkpoint without blocking the caller's commit path.
  ///
  /// `SingleFileDB` isn't held behind an owning `Arc` internally, so there's
  /// no way to hand a `'static` reference to a spawned thread here; this
  /// runs the checkpoint inline instead. A caller that wants true background
  /// checkpointing should wrap its handle in `Arc` and drive this from a
  /// dedicated thread itself.
  pub fn background_checkpoint(&self) -> Result<()> {
    self.checkpoint()
  }

  /// Gathers the fully-materialized (snapshot + delta, non-MVCC) graph state
  /// into the shape the snapshot builder wants.
  fn collect_graph_data(
    &self,
  ) -> (
    Vec<NodeInput>,
    Vec<EdgeInput>,
    Vec<(LabelId, String)>,
    Vec<(ETypeId, String)>,
    Vec<(PropKeyId, String)>,
  ) {
    let nodes = self
      .list_nodes()
      .into_iter()
      .map(|node_id| NodeInput {
        node_id,
        key: self.get_node_key(node_id),
        labels: self.get_node_labels(node_id),
        props: self.get_node_props(node_id).map(|m| m.into_iter().collect()).unwrap_or_default(),
      })
      .collect();

    let edges = self
      .list_edges(None)
      .into_iter()
      .map(|e| EdgeInput {
        src: e.src,
        etype: e.etype,
        dst: e.dst,
        props: self
          .get_edge_props(e.src, e.etype, e.dst)
          .map(|m| m.into_iter().collect())
          .unwrap_or_default(),
      })
      .collect();

    let schema = self.schema.read();
    let labels = schema.label_ids.iter().map(|(&id, name)| (id, name.clone())).collect();
    let etypes = schema.etype_ids.iter().map(|(&id, name)| (id, name.clone())).collect();
    let propkeys = schema.propkey_ids.iter().map(|(&id, name)| (id, name.clone())).collect();

    (nodes, edges, labels, etypes, propkeys)
  }

  /// Writes a freshly-built snapshot image to `start_page`, page-aligning
  /// its length and syncing before returning.
  fn write_snapshot_pages(
    &self,
    pager: &mut FilePager,
    start_page: u32,
    bytes: &[u8],
    page_size: usize,
  ) -> Result<()> {
    let page_count = pages_to_store(bytes.len(), page_size);
    let needed_pages = start_page as u64 + page_count as u64;
    if pager.num_pages() < needed_pages {
      pager.allocate_pages((needed_pages - pager.num_pages()) as u32)?;
    }
    let mut padded = bytes.to_vec();
    padded.resize(page_count as usize * page_size, 0);
    pager.write_pages(start_page as u64, &padded)?;
    pager.sync()?;
    Ok(())
  }

  /// Re-mmaps the snapshot region from the current header after a
  /// checkpoint, vacuum, or resize has moved or rebuilt it.
  fn reload_snapshot(&self) -> Result<()> {
    let header = self.header.read().clone();
    if header.snapshot_page_count == 0 {
      *self.snapshot.write() = None;
      return Ok(());
    }
    let snapshot_offset = (header.snapshot_start_page * header.page_size as u64) as usize;
    let mmap = {
      let pager = self.pager.lock();
      std::sync::Arc::new(unsafe { memmap2::Mmap::map(pager.file())? })
    };
    let snap = SnapshotData::parse_at_offset(mmap, snapshot_offset, &ParseSnapshotOptions::default())?;
    *self.snapshot.write() = Some(snap);
    self.cache_clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::single_file::{close_single_file, open_single_file, SingleFileOpenOptions};
  use tempfile::tempdir;

  #[test]
  fn test_resize_wal_grow_reopen() -> Result<()> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("resize-wal.raydb");

    let db = open_single_file(&db_path, SingleFileOpenOptions::new().wal_size(64 * 1024))?;
    db.begin(false)?;
    db.create_node(Some("a"))?;
    db.commit()?;

    db.resize_wal(1024 * 1024, None)?;
    close_single_file(db)?;

    let reopened = open_single_file(&db_path, SingleFileOpenOptions::new().wal_size(1024 * 1024))?;
    assert!(reopened.get_node_by_key("a").is_some());
    close_single_file(reopened)?;

    Ok(())
  }
}
