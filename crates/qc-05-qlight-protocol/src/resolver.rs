//! # Private Block Data Resolver
//!
//! Collects, for one block and one privacy scope, the private payloads the
//! scope is entitled to receive.
//!
//! ## Filters (per private or privacy-marker transaction)
//!
//! ```text
//! payload hash ── PTM receive ── not a party? skip
//!                      │
//!                      └── scope includes none of the managed parties? skip
//!                                │
//!                                └── keep, managed parties narrowed to the scope
//! ```
//!
//! Privacy markers contribute their own payload and, when that payload
//! decodes to an inner private transaction, the inner payload as well.

use shared_types::{Block, EncryptedPayloadHash, Transaction, ZERO_HASH};
use std::sync::Arc;
use tracing::debug;

use crate::domain::{BlockPrivateData, PrivateStateMetadata, PrivateTransactionData};
use crate::events::QLightError;
use crate::ports::{PrivateStateManager, PrivateTxManager};

pub struct PrivateBlockDataResolver {
    psm: Arc<dyn PrivateStateManager>,
    ptm: Arc<dyn PrivateTxManager>,
}

impl PrivateBlockDataResolver {
    pub fn new(psm: Arc<dyn PrivateStateManager>, ptm: Arc<dyn PrivateTxManager>) -> Self {
        Self { psm, ptm }
    }

    /// Private payloads of `block` visible to `psi`.
    ///
    /// Returns `Ok(None)` when nothing in the block concerns the scope.
    pub fn prepare_block_private_data(
        &self,
        block: &Block,
        psi: &str,
    ) -> Result<Option<BlockPrivateData>, QLightError> {
        let psm = self.psm.resolve_for_psi(psi)?;
        let mut private_transactions = Vec::new();

        for tx in &block.transactions {
            let mut tx = tx.clone();
            if tx.is_privacy_marker() {
                if let Some(ptd) = self.fetch_private_data(&tx.payload_hash(), &psm)? {
                    private_transactions.push(ptd);
                }
                if let Some(inner) = self.fetch_inner_transaction(&tx.payload_hash()) {
                    tx = inner;
                }
            }
            if tx.is_private() {
                if let Some(ptd) = self.fetch_private_data(&tx.payload_hash(), &psm)? {
                    private_transactions.push(ptd);
                }
            }
        }

        if private_transactions.is_empty() {
            return Ok(None);
        }

        let private_state_root = match self.psm.private_state_root(&block.header.state_root, psi) {
            Ok(root) => root,
            Err(e) => {
                debug!(
                    number = block.number(),
                    psi,
                    error = %e,
                    "[qlight] Unable to retrieve private state root while preparing block private data"
                );
                ZERO_HASH
            }
        };

        Ok(Some(BlockPrivateData {
            block_hash: block.hash(),
            psi: psi.to_string(),
            private_state_root,
            private_transactions,
        }))
    }

    fn fetch_private_data(
        &self,
        hash: &EncryptedPayloadHash,
        psm: &PrivateStateMetadata,
    ) -> Result<Option<PrivateTransactionData>, QLightError> {
        if hash.is_empty() {
            return Ok(None);
        }
        let Some((payload, mut extra)) = self.ptm.receive(hash)? else {
            return Ok(None);
        };
        if psm.not_include_any(&extra.managed_parties) {
            return Ok(None);
        }
        extra.managed_parties = psm.filter_addresses(&extra.managed_parties);

        let is_sender = if psm.is_legacy() {
            self.ptm.is_sender(hash).unwrap_or_else(|e| {
                debug!(hash = %hash, error = %e, "[qlight] Sender lookup failed, assuming not sender");
                false
            })
        } else {
            !psm.not_include_any(&[extra.sender.as_str()])
        };

        Ok(Some(PrivateTransactionData {
            hash: *hash,
            payload,
            extra,
            is_sender,
        }))
    }

    /// The private transaction wrapped by a privacy marker, if this node can see it.
    fn fetch_inner_transaction(&self, hash: &EncryptedPayloadHash) -> Option<Transaction> {
        let (payload, _) = self.ptm.receive(hash).ok()??;
        match bincode::deserialize::<Transaction>(&payload) {
            Ok(inner) => Some(inner),
            Err(e) => {
                debug!(hash = %hash, error = %e, "[qlight] Privacy marker payload is not a transaction");
                None
            }
        }
    }
}
