//! Little-endian binary read/write helpers shared by the snapshot, WAL and
//! manifest codecs.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{RayError, Result};

pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
  buf
    .get(offset..offset + 4)
    .map(LittleEndian::read_u32)
    .ok_or_else(|| RayError::format("buffer too short for u32 read"))
}

pub fn read_u64(buf: &[u8], offset: usize) -> Result<u64> {
  buf
    .get(offset..offset + 8)
    .map(LittleEndian::read_u64)
    .ok_or_else(|| RayError::format("buffer too short for u64 read"))
}

pub fn read_i64(buf: &[u8], offset: usize) -> Result<i64> {
  buf
    .get(offset..offset + 8)
    .map(LittleEndian::read_i64)
    .ok_or_else(|| RayError::format("buffer too short for i64 read"))
}

pub fn read_f64(buf: &[u8], offset: usize) -> Result<f64> {
  buf
    .get(offset..offset + 8)
    .map(LittleEndian::read_f64)
    .ok_or_else(|| RayError::format("buffer too short for f64 read"))
}

pub fn write_u32(buf: &mut Vec<u8>, value: u32) {
  let mut tmp = [0u8; 4];
  LittleEndian::write_u32(&mut tmp, value);
  buf.extend_from_slice(&tmp);
}

pub fn write_u64(buf: &mut Vec<u8>, value: u64) {
  let mut tmp = [0u8; 8];
  LittleEndian::write_u64(&mut tmp, value);
  buf.extend_from_slice(&tmp);
}

pub fn write_i64(buf: &mut Vec<u8>, value: i64) {
  let mut tmp = [0u8; 8];
  LittleEndian::write_i64(&mut tmp, value);
  buf.extend_from_slice(&tmp);
}

pub fn write_f64(buf: &mut Vec<u8>, value: f64) {
  let mut tmp = [0u8; 8];
  LittleEndian::write_f64(&mut tmp, value);
  buf.extend_from_slice(&tmp);
}

/// Rounds `n` up to the next multiple of `align` (`align` must be a power of two).
pub fn align_up(n: usize, align: usize) -> usize {
  (n + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrip_u64() {
    let mut buf = Vec::new();
    write_u64(&mut buf, 0xDEAD_BEEF_CAFE_BABE);
    assert_eq!(read_u64(&buf, 0).unwrap(), 0xDEAD_BEEF_CAFE_BABE);
  }

  #[test]
  fn align_up_rounds() {
    assert_eq!(align_up(0, 64), 0);
    assert_eq!(align_up(1, 64), 64);
    assert_eq!(align_up(64, 64), 64);
    assert_eq!(align_up(65, 8), 72);
  }
}
