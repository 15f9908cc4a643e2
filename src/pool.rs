//! Content-addressed blob pool (spec §4.1).
//!
//! Keys are content hashes; values are the raw bytes plus a reference
//! count. `put` is deterministic and idempotent — the same bytes always
//! hash to the same key, and a second `put` of already-known bytes only
//! bumps the refcount. Blobs never mutate after creation and `release`
//! never deletes: retention is the policy default (spec §9, Open
//! Question). `compact` is the only way to drop unreachable, zero-refcount
//! blobs, and it is never called implicitly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A content hash: the BLAKE3-256 digest of a blob's bytes, treated as an
/// opaque fixed-width identifier. Two distinct inputs are assumed not to
/// collide.
pub type Hash = [u8; 32];

/// Renders a hash the way the CLI and audit log display it.
pub fn hash_to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

fn hash_bytes(bytes: &[u8]) -> Hash {
    *blake3::hash(bytes).as_bytes()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Blob {
    bytes: Vec<u8>,
    refcount: u64,
}

/// Content-addressed, deduplicated, reference-counted byte store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlobPool {
    #[serde(with = "hashmap_as_pairs")]
    blobs: HashMap<Hash, Blob>,
}

/// `serde_json` objects require string keys, but [`Hash`] is a byte array,
/// so the map is serialized as an association list instead.
mod hashmap_as_pairs {
    use std::collections::HashMap;
    use std::hash::Hash;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, K, V>(map: &HashMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        K: Serialize,
        V: Serialize,
    {
        let pairs: Vec<(&K, &V)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D, K, V>(deserializer: D) -> Result<HashMap<K, V>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de> + Eq + Hash,
        V: Deserialize<'de>,
    {
        let pairs: Vec<(K, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

impl BlobPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes `bytes`, inserting a new blob with refcount 1 if the hash is
    /// unseen, or incrementing the refcount of the existing blob. Returns
    /// the content hash either way.
    pub fn put(&mut self, bytes: &[u8]) -> Hash {
        let hash = hash_bytes(bytes);
        self.blobs
            .entry(hash)
            .and_modify(|b| b.refcount += 1)
            .or_insert_with(|| Blob {
                bytes: bytes.to_vec(),
                refcount: 1,
            });
        hash
    }

    /// Computes the content hash `put` would assign to `bytes`, without
    /// storing anything — used to predict a mutation's effect on pool size
    /// before committing it (spec §4.6: quota checks run before a
    /// mutation is admitted).
    pub fn hash_of(bytes: &[u8]) -> Hash {
        hash_bytes(bytes)
    }

    /// True if a blob with this hash is already stored, regardless of its
    /// refcount.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.blobs.contains_key(hash)
    }

    /// Returns the bytes for `hash`, failing with `NotFound` if absent.
    pub fn get(&self, hash: &Hash) -> Result<&[u8]> {
        self.blobs
            .get(hash)
            .map(|b| b.bytes.as_slice())
            .ok_or_else(|| EngineError::NotFound(format!("blob {}", hash_to_hex(hash))))
    }

    /// Increments the refcount of an already-present blob (used when a new
    /// namespace entry starts referencing it, e.g. `copy` or `hardlink`).
    pub fn retain(&mut self, hash: &Hash) -> Result<()> {
        let blob = self
            .blobs
            .get_mut(hash)
            .ok_or_else(|| EngineError::NotFound(format!("blob {}", hash_to_hex(hash))))?;
        blob.refcount += 1;
        Ok(())
    }

    /// Decrements the refcount of a blob. Never removes the blob, even at
    /// zero: reclamation only happens via an explicit `compact`.
    pub fn release(&mut self, hash: &Hash) -> Result<()> {
        let blob = self
            .blobs
            .get_mut(hash)
            .ok_or_else(|| EngineError::NotFound(format!("blob {}", hash_to_hex(hash))))?;
        blob.refcount = blob.refcount.saturating_sub(1);
        Ok(())
    }

    /// Byte length of the blob identified by `hash`.
    pub fn length(&self, hash: &Hash) -> Result<u64> {
        self.get(hash).map(|b| b.len() as u64)
    }

    /// Current reference count of the blob identified by `hash`.
    pub fn refcount(&self, hash: &Hash) -> Result<u64> {
        self.blobs
            .get(hash)
            .map(|b| b.refcount)
            .ok_or_else(|| EngineError::NotFound(format!("blob {}", hash_to_hex(hash))))
    }

    /// Sum of the byte lengths of every distinct blob in the pool — the
    /// Engine's notion of "pool size" used by the quota accountant and by
    /// the dedup invariant (spec Testable Property 7: `copy` must not
    /// change this total).
    pub fn total_bytes(&self) -> u64 {
        self.blobs.values().map(|b| b.bytes.len() as u64).sum()
    }

    /// Number of distinct blobs currently stored.
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Discards every blob with refcount 0 that is not present in
    /// `reachable`. Returns the number of blobs discarded. This is the
    /// optional `compact` operation from spec §9 — never run implicitly.
    pub fn compact(&mut self, reachable: &std::collections::HashSet<Hash>) -> usize {
        let before = self.blobs.len();
        self.blobs
            .retain(|hash, blob| blob.refcount > 0 || reachable.contains(hash));
        before - self.blobs.len()
    }

    /// Iterates over every hash currently stored, for integrity checks and
    /// serialization.
    pub fn hashes(&self) -> impl Iterator<Item = &Hash> {
        self.blobs.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_idempotent_and_dedups() {
        let mut pool = BlobPool::new();
        let h1 = pool.put(b"hello");
        let h2 = pool.put(b"hello");
        assert_eq!(h1, h2);
        assert_eq!(pool.refcount(&h1).unwrap(), 2);
        assert_eq!(pool.total_bytes(), 5);
    }

    #[test]
    fn release_never_deletes() {
        let mut pool = BlobPool::new();
        let h = pool.put(b"x");
        pool.release(&h).unwrap();
        assert_eq!(pool.refcount(&h).unwrap(), 0);
        assert!(pool.get(&h).is_ok());
    }

    #[test]
    fn compact_drops_only_unreachable_zero_refcount_blobs() {
        let mut pool = BlobPool::new();
        let h1 = pool.put(b"a");
        let h2 = pool.put(b"b");
        pool.release(&h1).unwrap();
        pool.release(&h2).unwrap();
        let mut reachable = std::collections::HashSet::new();
        reachable.insert(h2);
        let dropped = pool.compact(&reachable);
        assert_eq!(dropped, 1);
        assert!(pool.get(&h1).is_err());
        assert!(pool.get(&h2).is_ok());
    }
}
