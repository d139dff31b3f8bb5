//! # Private Client Cache
//!
//! Client-side store of the private payloads pushed by the server.
//!
//! Blocks and transaction broadcasts arrive independently of their private
//! payloads, so every private or privacy-marker transaction seen by the
//! client first gets an empty entry. A later `NewBlockPrivateData` batch
//! fills it. A filled entry is never downgraded back to empty.
//!
//! The cache doubles as the client's [`PrivateTxManager`]: lookups that miss
//! fall through to an optional remote manager and the answer is cached.

use parking_lot::RwLock;
use shared_types::{EncryptedPayloadHash, Hash, Transaction, ZERO_HASH};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::domain::{BlockPrivateData, ExtraMetadata};
use crate::events::QLightError;
use crate::ports::{PrivateStateRootStore, PrivateTxManager};

#[derive(Clone, Debug, PartialEq, Eq)]
enum CacheEntry {
    /// Seen on chain, payload not delivered (or not visible to us).
    Empty,
    Filled {
        payload: Vec<u8>,
        extra: ExtraMetadata,
        is_sender: bool,
    },
}

pub struct PrivateClientCache {
    entries: RwLock<HashMap<EncryptedPayloadHash, CacheEntry>>,
    /// Block hash to the private state root announced by the server.
    state_roots: RwLock<HashMap<Hash, Hash>>,
    root_store: Arc<dyn PrivateStateRootStore>,
    remote: Option<Arc<dyn PrivateTxManager>>,
}

impl PrivateClientCache {
    pub fn new(
        root_store: Arc<dyn PrivateStateRootStore>,
        remote: Option<Arc<dyn PrivateTxManager>>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            state_roots: RwLock::new(HashMap::new()),
            root_store,
            remote,
        }
    }

    /// Merges a server batch. Re-delivery of a known payload overwrites it in place.
    pub fn add_private_block(&self, data: BlockPrivateData) {
        let count = data.private_transactions.len();
        {
            let mut entries = self.entries.write();
            for ptd in data.private_transactions {
                entries.insert(
                    ptd.hash,
                    CacheEntry::Filled {
                        payload: ptd.payload,
                        extra: ptd.extra,
                        is_sender: ptd.is_sender,
                    },
                );
            }
        }
        self.state_roots
            .write()
            .insert(data.block_hash, data.private_state_root);
        debug!(
            block = %shared_types::short_hex(&data.block_hash),
            psi = %data.psi,
            count,
            "[qlight] Cached block private data"
        );
    }

    /// Registers an empty entry for a private or privacy-marker transaction.
    ///
    /// Returns `true` when a new entry was created.
    pub fn check_and_add_empty_entry(&self, hash: &EncryptedPayloadHash) -> bool {
        if hash.is_empty() {
            return false;
        }
        let mut entries = self.entries.write();
        if entries.contains_key(hash) {
            return false;
        }
        entries.insert(*hash, CacheEntry::Empty);
        trace!(hash = %hash, "[qlight] Added empty private cache entry");
        true
    }

    /// Registers empty entries for every private payload referenced by `txs`.
    pub fn add_empty_entries<'a>(&self, txs: impl IntoIterator<Item = &'a Transaction>) -> usize {
        txs.into_iter()
            .filter(|tx| tx.is_private() || tx.is_privacy_marker())
            .filter(|tx| self.check_and_add_empty_entry(&tx.payload_hash()))
            .count()
    }

    pub fn contains(&self, hash: &EncryptedPayloadHash) -> bool {
        self.entries.read().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Checks the private state root the server announced for `block_hash`
    /// against the one computed locally for `public_root`.
    ///
    /// Blocks the server sent no private data for always pass.
    pub fn validate_private_state_root(
        &self,
        block_hash: &Hash,
        public_root: &Hash,
    ) -> Result<(), QLightError> {
        let Some(cached) = self.state_roots.read().get(block_hash).copied() else {
            return Ok(());
        };
        let local = self
            .root_store
            .private_state_root(public_root)
            .unwrap_or(ZERO_HASH);
        if cached != local {
            return Err(QLightError::PrivateStateRootMismatch {
                block_hash: *block_hash,
                cached,
                local,
            });
        }
        Ok(())
    }

    fn fetch_remote(
        &self,
        hash: &EncryptedPayloadHash,
    ) -> Result<Option<(Vec<u8>, ExtraMetadata)>, QLightError> {
        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        let found = remote.receive(hash)?;
        let entry = match &found {
            Some((payload, extra)) => CacheEntry::Filled {
                payload: payload.clone(),
                extra: extra.clone(),
                is_sender: remote.is_sender(hash)?,
            },
            None => CacheEntry::Empty,
        };
        self.entries.write().insert(*hash, entry);
        Ok(found)
    }
}

impl PrivateTxManager for PrivateClientCache {
    fn receive(
        &self,
        hash: &EncryptedPayloadHash,
    ) -> Result<Option<(Vec<u8>, ExtraMetadata)>, QLightError> {
        if hash.is_empty() {
            return Ok(None);
        }
        let cached = self.entries.read().get(hash).cloned();
        match cached {
            Some(CacheEntry::Filled { payload, extra, .. }) => Ok(Some((payload, extra))),
            Some(CacheEntry::Empty) => Ok(None),
            None => self.fetch_remote(hash),
        }
    }

    fn is_sender(&self, hash: &EncryptedPayloadHash) -> Result<bool, QLightError> {
        match self.entries.read().get(hash) {
            Some(CacheEntry::Filled { is_sender, .. }) => Ok(*is_sender),
            _ => Ok(false),
        }
    }
}
