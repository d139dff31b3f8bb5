//! Bounded set of hashes a peer is known to have.

use parking_lot::RwLock;
use shared_types::Hash;
use std::collections::{HashSet, VecDeque};

/// Maximum block hashes remembered per peer.
pub const MAX_KNOWN_BLOCKS: usize = 1024;

/// Maximum transaction hashes remembered per peer.
pub const MAX_KNOWN_TXS: usize = 32768;

/// Insertion-ordered, capacity-bounded hash set.
///
/// Inserting into a full set evicts the oldest entries until there is room.
/// Shared between a peer's dispatcher and the broadcast loops, hence the lock.
pub struct KnownSet {
    inner: RwLock<KnownInner>,
    max_size: usize,
}

struct KnownInner {
    hashes: HashSet<Hash>,
    order: VecDeque<Hash>,
}

impl KnownSet {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(KnownInner {
                hashes: HashSet::with_capacity(max_size.min(4096)),
                order: VecDeque::with_capacity(max_size.min(4096)),
            }),
            max_size: max_size.max(1),
        }
    }

    /// Check whether the hash is known.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.read().hashes.contains(hash)
    }

    /// Mark a hash as known. Returns `false` if it was already present.
    pub fn insert(&self, hash: Hash) -> bool {
        let mut inner = self.inner.write();
        if inner.hashes.contains(&hash) {
            return false;
        }
        while inner.hashes.len() >= self.max_size {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.hashes.remove(&oldest);
                }
                None => break,
            }
        }
        inner.hashes.insert(hash);
        inner.order.push_back(hash);
        true
    }

    /// Forget a hash. Returns `false` if it was not present.
    pub fn remove(&self, hash: &Hash) -> bool {
        let mut inner = self.inner.write();
        if !inner.hashes.remove(hash) {
            return false;
        }
        inner.order.retain(|known| known != hash);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.read().hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().hashes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}
