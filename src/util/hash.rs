//! xxHash64 wrapper used for key-index hashing.

use xxhash_rust::xxh64::xxh64;

/// Seed used for all key-index hashing. Fixed so that key-index entries
/// built by different writer runs remain bit-identical for the same input.
pub const KEY_HASH_SEED: u64 = 0;

pub fn hash64(data: &[u8]) -> u64 {
  xxh64(data, KEY_HASH_SEED)
}

pub fn hash_str(s: &str) -> u64 {
  hash64(s.as_bytes())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deterministic() {
    assert_eq!(hash_str("alice"), hash_str("alice"));
    assert_ne!(hash_str("alice"), hash_str("bob"));
  }
}
