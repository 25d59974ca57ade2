use xxhash_rust::xxh3::Xxh3;
use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh3::xxh3_128;

/// Hasher used to generate the identifiers woven through the bundle graph.
///
/// The hashes don't need to be incredibly fast, but they must be stable
/// across runs, machines, platforms and versions, since they end up in
/// emitted bundle names and caches.
pub type IdentifierHasher = Xxh3;

pub fn hash_string(s: &str) -> String {
  hash_bytes(s.as_bytes())
}

pub fn hash_bytes(bytes: &[u8]) -> String {
  format!("{:016x}", xxh3_64(bytes))
}

/// 128-bit fingerprint used as the stable identity of generated bundles.
///
/// A collision here would silently merge two distinct shared bundles, so
/// this uses the wider digest rather than [`hash_string`].
pub fn fingerprint_string(s: &str) -> String {
  format!("{:032x}", xxh3_128(s.as_bytes()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hashes_are_deterministic() {
    assert_eq!(hash_string("entry.js"), hash_string("entry.js"));
    assert_ne!(hash_string("entry.js"), hash_string("other.js"));
    assert_eq!(hash_string("entry.js").len(), 16);
  }

  #[test]
  fn fingerprints_are_wider_than_ids() {
    let fingerprint = fingerprint_string("a:b:c");
    assert_eq!(fingerprint, fingerprint_string("a:b:c"));
    assert_ne!(fingerprint, fingerprint_string("a:b"));
    assert_eq!(fingerprint.len(), 32);
  }
}
