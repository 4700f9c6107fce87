//! String hashing for the snapshot key index.

use xxhash_rust::xxh64::xxh64;

/// Seed shared by the snapshot writer and reader. Must never change:
/// it is baked into every on-disk key index.
const KEY_HASH_SEED: u64 = 0;

/// 64-bit hash of a node key.
#[inline]
pub fn xxhash64_string(value: &str) -> u64 {
  xxh64(value.as_bytes(), KEY_HASH_SEED)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stable_and_distinct() {
    let a = xxhash64_string("alice");
    let b = xxhash64_string("bob");
    assert_eq!(a, xxhash64_string("alice"));
    assert_ne!(a, b);
  }
}
