//! Optional per-section compression for snapshot payloads.

use std::io::{Read, Write};

use crate::error::{RayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Compression {
  None = 0,
  Deflate = 1,
  Zstd = 2,
}

impl Compression {
  pub fn from_u32(v: u32) -> Result<Self> {
    Ok(match v {
      0 => Self::None,
      1 => Self::Deflate,
      2 => Self::Zstd,
      other => return Err(RayError::format(format!("unknown compression tag {other}"))),
    })
  }
}

pub fn compress(data: &[u8], method: Compression) -> Result<Vec<u8>> {
  match method {
    Compression::None => Ok(data.to_vec()),
    Compression::Deflate => {
      let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
      encoder.write_all(data)?;
      Ok(encoder.finish()?)
    }
    Compression::Zstd => zstd::stream::encode_all(data, 3).map_err(RayError::Io),
  }
}

pub fn decompress(data: &[u8], method: Compression, uncompressed_size: usize) -> Result<Vec<u8>> {
  match method {
    Compression::None => Ok(data.to_vec()),
    Compression::Deflate => {
      let mut decoder = flate2::read::DeflateDecoder::new(data);
      let mut out = Vec::with_capacity(uncompressed_size);
      decoder.read_to_end(&mut out)?;
      Ok(out)
    }
    Compression::Zstd => zstd::stream::decode_all(data).map_err(RayError::Io),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deflate_roundtrip() {
    let data = b"repeated repeated repeated repeated data".repeat(4);
    let compressed = compress(&data, Compression::Deflate).unwrap();
    let restored = decompress(&compressed, Compression::Deflate, data.len()).unwrap();
    assert_eq!(restored, data);
  }

  #[test]
  fn none_is_identity() {
    let data = b"hello".to_vec();
    assert_eq!(compress(&data, Compression::None).unwrap(), data);
  }
}
