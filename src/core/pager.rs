//! Fixed-size page I/O over a single on-disk file, used by the single-file
//! container format.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::constants::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::error::{RayError, Result};

pub fn is_valid_page_size(size: usize) -> bool {
  size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size)
}

/// Number of whole pages needed to store `bytes` worth of data.
pub fn pages_to_store(bytes: usize, page_size: usize) -> u32 {
  ((bytes + page_size - 1) / page_size) as u32
}

/// A page-addressed view over a single file.
pub struct FilePager {
  file: File,
  page_size: usize,
  num_pages: u64,
}

impl FilePager {
  pub fn file(&self) -> &File {
    &self.file
  }

  pub fn page_size(&self) -> usize {
    self.page_size
  }

  pub fn num_pages(&self) -> u64 {
    self.num_pages
  }

  pub fn read_page(&mut self, page: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; self.page_size];
    self.file.seek(SeekFrom::Start(page * self.page_size as u64))?;
    self.file.read_exact(&mut buf)?;
    Ok(buf)
  }

  pub fn read_pages(&mut self, start: u64, count: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; (count as usize) * self.page_size];
    self.file.seek(SeekFrom::Start(start * self.page_size as u64))?;
    self.file.read_exact(&mut buf)?;
    Ok(buf)
  }

  pub fn write_page(&mut self, page: u64, data: &[u8]) -> Result<()> {
    if data.len() != self.page_size {
      return Err(RayError::InvariantViolation(format!(
        "write_page: expected {} bytes, got {}",
        self.page_size,
        data.len()
      )));
    }
    self.file.seek(SeekFrom::Start(page * self.page_size as u64))?;
    self.file.write_all(data)?;
    if page + 1 > self.num_pages {
      self.num_pages = page + 1;
    }
    Ok(())
  }

  pub fn write_pages(&mut self, start: u64, data: &[u8]) -> Result<()> {
    self.file.seek(SeekFrom::Start(start * self.page_size as u64))?;
    self.file.write_all(data)?;
    let written_pages = pages_to_store(data.len(), self.page_size) as u64;
    if start + written_pages > self.num_pages {
      self.num_pages = start + written_pages;
    }
    Ok(())
  }

  /// Extends the file by `count` pages, zero-filled, returning the first
  /// newly-allocated page index.
  pub fn allocate_pages(&mut self, count: u32) -> Result<u64> {
    let start = self.num_pages;
    let new_len = (start + count as u64) * self.page_size as u64;
    self.file.set_len(new_len)?;
    self.num_pages += count as u64;
    Ok(start)
  }

  pub fn truncate_pages(&mut self, num_pages: u64) -> Result<()> {
    self.file.set_len(num_pages * self.page_size as u64)?;
    self.num_pages = num_pages;
    Ok(())
  }

  pub fn sync(&mut self) -> Result<()> {
    self.file.sync_all()?;
    Ok(())
  }
}

pub fn create_pager<P: AsRef<Path>>(path: P, page_size: usize) -> Result<FilePager> {
  let file = OpenOptions::new()
    .read(true)
    .write(true)
    .create_new(true)
    .open(path)?;
  Ok(FilePager {
    file,
    page_size,
    num_pages: 0,
  })
}

pub fn open_pager<P: AsRef<Path>>(path: P, page_size: usize) -> Result<FilePager> {
  let file = OpenOptions::new().read(true).write(true).open(path)?;
  let len = file.metadata()?.len();
  let num_pages = len / page_size as u64;
  Ok(FilePager {
    file,
    page_size,
    num_pages,
  })
}

pub fn open_pager_read_only<P: AsRef<Path>>(path: P, page_size: usize) -> Result<FilePager> {
  let file = OpenOptions::new().read(true).open(path)?;
  let len = file.metadata()?.len();
  let num_pages = len / page_size as u64;
  Ok(FilePager {
    file,
    page_size,
    num_pages,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn create_write_reopen_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.raydb");
    {
      let mut pager = create_pager(&path, 4096).unwrap();
      pager.allocate_pages(4).unwrap();
      pager.write_page(0, &vec![7u8; 4096]).unwrap();
      pager.sync().unwrap();
    }
    let mut pager = open_pager(&path, 4096).unwrap();
    let page = pager.read_page(0).unwrap();
    assert_eq!(page, vec![7u8; 4096]);
    assert_eq!(pager.num_pages(), 4);
  }

  #[test]
  fn valid_page_sizes() {
    assert!(is_valid_page_size(4096));
    assert!(is_valid_page_size(65536));
    assert!(!is_valid_page_size(4097));
    assert!(!is_valid_page_size(2048));
  }
}
