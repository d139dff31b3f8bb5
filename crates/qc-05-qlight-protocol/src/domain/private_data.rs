//! Private payload batches relayed from a qlight server to its clients.

use serde::{Deserialize, Serialize};
use shared_types::{EncryptedPayloadHash, Hash};

/// Metadata stored next to an encrypted payload by the private transaction manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExtraMetadata {
    /// Affected-contract hashes.
    pub ac_hashes: Vec<Hash>,
    /// Merkle root over the affected contracts.
    pub ac_merkle_root: Hash,
    /// Privacy flag (standard private, party protection, state validation).
    pub privacy_flag: u32,
    /// Parties managed by this node that are recipients of the payload.
    pub managed_parties: Vec<String>,
    /// Sending party.
    pub sender: String,
    /// Recipients that must receive every state change.
    pub mandatory_recipients: Vec<String>,
}

/// One private transaction payload, addressed by its encrypted payload hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateTransactionData {
    pub hash: EncryptedPayloadHash,
    pub payload: Vec<u8>,
    pub extra: ExtraMetadata,
    pub is_sender: bool,
}

/// The private payloads of one block visible to one privacy scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPrivateData {
    pub block_hash: Hash,
    pub psi: String,
    pub private_state_root: Hash,
    pub private_transactions: Vec<PrivateTransactionData>,
}

/// A privacy scope as resolved by the private state manager.
///
/// A scope without addresses is the single legacy private state of a node
/// that does not run multiple private states; it covers every party.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PrivateStateMetadata {
    pub id: String,
    pub name: String,
    pub addresses: Vec<String>,
}

impl PrivateStateMetadata {
    pub fn new(id: impl Into<String>, addresses: Vec<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            addresses,
        }
    }

    /// Legacy scope covering every party.
    pub fn legacy(id: impl Into<String>) -> Self {
        Self::new(id, Vec::new())
    }

    pub fn is_legacy(&self) -> bool {
        self.addresses.is_empty()
    }

    /// `true` when none of `parties` belongs to this scope.
    pub fn not_include_any<S: AsRef<str>>(&self, parties: &[S]) -> bool {
        if self.is_legacy() {
            return false;
        }
        !parties
            .iter()
            .any(|party| self.addresses.iter().any(|a| a == party.as_ref()))
    }

    /// Keeps only the parties that belong to this scope.
    pub fn filter_addresses(&self, parties: &[String]) -> Vec<String> {
        if self.is_legacy() {
            return parties.to_vec();
        }
        parties
            .iter()
            .filter(|party| self.addresses.contains(party))
            .cloned()
            .collect()
    }
}
