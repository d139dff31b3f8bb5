//! # Core Domain Entities
//!
//! Chain entities exchanged between qlight peers.
//!
//! ## Clusters
//!
//! - **Chain**: [`Header`], [`Body`], [`Block`], [`ForkId`]
//! - **Transactions**: [`Transaction`], [`TxKind`], [`EncryptedPayloadHash`]

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::errors::ChainError;

// Re-export U256 from primitive-types for use across all crates
pub use primitive_types::U256;

// =============================================================================
// CLUSTER A: PRIMITIVES
// =============================================================================

/// A 32-byte content hash (SHA-256).
pub type Hash = [u8; 32];

/// A 20-byte account address.
pub type Address = [u8; 20];

/// The all-zero hash.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Maximum bit length of a header difficulty.
pub const MAX_DIFFICULTY_BITS: usize = 80;

/// Maximum size of the header extra-data field (100 KiB).
pub const MAX_EXTRA_DATA_SIZE: usize = 100 * 1024;

/// Length of an encrypted payload hash produced by the private transaction manager.
pub const ENCRYPTED_PAYLOAD_HASH_LEN: usize = 64;

/// Content address of an encrypted private payload (64 bytes).
///
/// Private and privacy-marker transactions carry this hash as their data field;
/// the payload itself lives off-chain in the private transaction manager.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncryptedPayloadHash(#[serde_as(as = "Bytes")] pub [u8; ENCRYPTED_PAYLOAD_HASH_LEN]);

impl EncryptedPayloadHash {
    /// Builds a payload hash from arbitrary bytes.
    ///
    /// Longer inputs keep their trailing 64 bytes, shorter inputs are
    /// left-padded with zeroes.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut out = [0u8; ENCRYPTED_PAYLOAD_HASH_LEN];
        let bytes = if bytes.len() > ENCRYPTED_PAYLOAD_HASH_LEN {
            &bytes[bytes.len() - ENCRYPTED_PAYLOAD_HASH_LEN..]
        } else {
            bytes
        };
        out[ENCRYPTED_PAYLOAD_HASH_LEN - bytes.len()..].copy_from_slice(bytes);
        Self(out)
    }

    /// Returns `true` for the all-zero hash.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex encoding with a `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl Default for EncryptedPayloadHash {
    fn default() -> Self {
        Self([0u8; ENCRYPTED_PAYLOAD_HASH_LEN])
    }
}

impl fmt::Debug for EncryptedPayloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedPayloadHash({})", self.to_hex())
    }
}

impl fmt::Display for EncryptedPayloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Short hex rendering of a hash for log lines.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..4])
}

// =============================================================================
// CLUSTER B: TRANSACTIONS
// =============================================================================

/// Privacy classification of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TxKind {
    /// Ordinary public transaction.
    #[default]
    Public,
    /// Private transaction; `data` is the encrypted payload hash.
    Private,
    /// Public marker referencing a private transaction by payload hash.
    PrivacyMarker,
}

/// A signed transaction as relayed between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender nonce.
    pub nonce: u64,
    /// Gas price in base units.
    pub gas_price: U256,
    /// Gas limit.
    pub gas_limit: u64,
    /// Recipient (None for contract creation).
    pub to: Option<Address>,
    /// Transferred value.
    pub value: U256,
    /// Call data, or the encrypted payload hash for private/marker transactions.
    pub data: Vec<u8>,
    /// Privacy classification.
    pub kind: TxKind,
}

impl Transaction {
    /// Creates a public transaction.
    pub fn new_public(nonce: u64, to: Option<Address>, value: U256, data: Vec<u8>) -> Self {
        Self {
            nonce,
            gas_price: U256::zero(),
            gas_limit: 21_000,
            to,
            value,
            data,
            kind: TxKind::Public,
        }
    }

    /// Creates a private transaction pointing at an off-chain payload.
    pub fn new_private(nonce: u64, to: Option<Address>, payload: EncryptedPayloadHash) -> Self {
        Self {
            nonce,
            gas_price: U256::zero(),
            gas_limit: 90_000,
            to,
            value: U256::zero(),
            data: payload.0.to_vec(),
            kind: TxKind::Private,
        }
    }

    /// Creates a privacy-marker transaction pointing at a private transaction.
    pub fn new_privacy_marker(nonce: u64, payload: EncryptedPayloadHash) -> Self {
        Self {
            nonce,
            gas_price: U256::zero(),
            gas_limit: 90_000,
            to: None,
            value: U256::zero(),
            data: payload.0.to_vec(),
            kind: TxKind::PrivacyMarker,
        }
    }

    /// Compute the transaction hash.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(u256_bytes(&self.gas_price));
        hasher.update(self.gas_limit.to_be_bytes());
        match &self.to {
            Some(to) => {
                hasher.update([1u8]);
                hasher.update(to);
            }
            None => hasher.update([0u8]),
        }
        hasher.update(u256_bytes(&self.value));
        hasher.update((self.data.len() as u64).to_be_bytes());
        hasher.update(&self.data);
        hasher.update([self.kind as u8]);
        hasher.finalize().into()
    }

    /// Returns `true` for private transactions.
    pub fn is_private(&self) -> bool {
        self.kind == TxKind::Private
    }

    /// Returns `true` for privacy-marker transactions.
    pub fn is_privacy_marker(&self) -> bool {
        self.kind == TxKind::PrivacyMarker
    }

    /// The encrypted payload hash carried in `data`.
    pub fn payload_hash(&self) -> EncryptedPayloadHash {
        EncryptedPayloadHash::from_slice(&self.data)
    }
}

// =============================================================================
// CLUSTER C: THE CHAIN
// =============================================================================

/// Block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Header {
    /// Hash of the parent block.
    pub parent_hash: Hash,
    /// Hash over the uncle headers.
    pub uncle_hash: Hash,
    /// Block producer.
    pub coinbase: Address,
    /// Public state root after this block.
    pub state_root: Hash,
    /// Hash over the block's transactions.
    pub tx_root: Hash,
    /// Consensus weight contributed by this block.
    pub difficulty: U256,
    /// Height (0 = genesis).
    pub number: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas used.
    pub gas_used: u64,
    /// Unix timestamp (seconds).
    pub time: u64,
    /// Free-form extra data.
    pub extra: Vec<u8>,
}

impl Header {
    /// Compute the header hash.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.parent_hash);
        hasher.update(self.uncle_hash);
        hasher.update(self.coinbase);
        hasher.update(self.state_root);
        hasher.update(self.tx_root);
        hasher.update(u256_bytes(&self.difficulty));
        hasher.update(self.number.to_be_bytes());
        hasher.update(self.gas_limit.to_be_bytes());
        hasher.update(self.gas_used.to_be_bytes());
        hasher.update(self.time.to_be_bytes());
        hasher.update((self.extra.len() as u64).to_be_bytes());
        hasher.update(&self.extra);
        hasher.finalize().into()
    }

    /// Checks field ranges that no honest producer exceeds.
    pub fn sanity_check(&self) -> Result<(), ChainError> {
        let bits = self.difficulty.bits();
        if bits > MAX_DIFFICULTY_BITS {
            return Err(ChainError::DifficultyTooLarge {
                bits,
                max: MAX_DIFFICULTY_BITS,
            });
        }
        if self.extra.len() > MAX_EXTRA_DATA_SIZE {
            return Err(ChainError::ExtraDataTooLarge {
                size: self.extra.len(),
                max: MAX_EXTRA_DATA_SIZE,
            });
        }
        if self.gas_used > self.gas_limit {
            return Err(ChainError::GasUsedAboveLimit {
                used: self.gas_used,
                limit: self.gas_limit,
            });
        }
        Ok(())
    }
}

/// Block body: everything in a block except the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Body {
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Header>,
}

/// A full block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Header>,
}

impl Block {
    /// Assembles a block, deriving `tx_root` and `uncle_hash` from the contents.
    pub fn new(mut header: Header, transactions: Vec<Transaction>, uncles: Vec<Header>) -> Self {
        header.tx_root = calc_tx_root(&transactions);
        header.uncle_hash = calc_uncle_hash(&uncles);
        Self {
            header,
            transactions,
            uncles,
        }
    }

    /// Reassembles a block from a header and a body without touching the roots.
    pub fn from_parts(header: Header, body: Body) -> Self {
        Self {
            header,
            transactions: body.transactions,
            uncles: body.uncles,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    pub fn difficulty(&self) -> U256 {
        self.header.difficulty
    }

    /// Clones the body out of the block.
    pub fn body(&self) -> Body {
        Body {
            transactions: self.transactions.clone(),
            uncles: self.uncles.clone(),
        }
    }
}

/// Hash over an ordered transaction list.
pub fn calc_tx_root(transactions: &[Transaction]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(b"txs");
    for tx in transactions {
        hasher.update(tx.hash());
    }
    hasher.finalize().into()
}

/// Hash over an ordered uncle list.
pub fn calc_uncle_hash(uncles: &[Header]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(b"uncles");
    for uncle in uncles {
        hasher.update(uncle.hash());
    }
    hasher.finalize().into()
}

/// Compact fingerprint of a chain's fork history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ForkId {
    /// Checksum of genesis + passed fork blocks.
    pub hash: u32,
    /// Block number of the next expected fork (0 if none).
    pub next: u64,
}

impl ForkId {
    pub fn new(hash: u32, next: u64) -> Self {
        Self { hash, next }
    }

    /// Check a remote fork id against ours.
    ///
    /// Checksums must match, and a remote announcing an upcoming fork we have
    /// already passed without forking is stale.
    pub fn is_compatible(&self, remote: &ForkId, local_head: u64) -> bool {
        if self.hash != remote.hash {
            return false;
        }
        remote.next == 0 || local_head < remote.next
    }
}

fn u256_bytes(value: &U256) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    bytes
}
