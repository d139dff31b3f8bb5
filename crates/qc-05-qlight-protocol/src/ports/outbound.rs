//! Outbound ports (SPI) for the qlight protocol.
//!
//! Everything the handler consumes but does not own: the chain, the
//! transaction pool, the downloader, the private transaction manager, the
//! private state manager and the authentication manager.

use async_trait::async_trait;
use shared_types::{Block, Body, EncryptedPayloadHash, ForkId, Hash, Header, Transaction, U256};
use tokio::sync::broadcast;

use crate::domain::{ExtraMetadata, Packet, PrivateStateMetadata};
use crate::events::QLightError;

/// Read access to the local chain plus its head feed.
pub trait ChainBackend: Send + Sync {
    fn genesis(&self) -> Block;

    fn current_header(&self) -> Header;

    /// Total difficulty of the block `hash` at height `number`.
    fn total_difficulty(&self, hash: &Hash, number: u64) -> Option<U256>;

    fn block(&self, hash: &Hash, number: u64) -> Option<Block>;

    fn block_by_hash(&self, hash: &Hash) -> Option<Block>;

    fn header_by_hash(&self, hash: &Hash) -> Option<Header>;

    fn header_by_number(&self, number: u64) -> Option<Header>;

    fn body_by_hash(&self, hash: &Hash) -> Option<Body> {
        self.block_by_hash(hash).map(|block| block.body())
    }

    fn fork_id(&self) -> ForkId;

    /// Chain configuration as exposed through node info.
    fn chain_config(&self) -> serde_json::Value;

    /// New canonical heads, in import order.
    fn subscribe_chain_head(&self) -> broadcast::Receiver<Block>;
}

/// Transaction pool.
pub trait TxPool: Send + Sync {
    fn has(&self, hash: &Hash) -> bool;

    fn get(&self, hash: &Hash) -> Option<Transaction>;

    /// Executable transactions currently pooled.
    fn pending(&self) -> Vec<Transaction>;

    /// Batches of newly pooled transactions.
    fn subscribe_new_txs(&self) -> broadcast::Receiver<Vec<Transaction>>;
}

/// Downstream chain synchronisation (downloader and fetchers).
///
/// Receives every packet the client does not consume itself.
#[async_trait]
pub trait ChainSync: Send + Sync {
    async fn handle(&self, peer_id: &str, packet: Packet) -> Result<(), QLightError>;
}

/// Private transaction manager holding encrypted payloads.
pub trait PrivateTxManager: Send + Sync {
    /// Payload and metadata for `hash`; `None` when this node is not a party.
    fn receive(
        &self,
        hash: &EncryptedPayloadHash,
    ) -> Result<Option<(Vec<u8>, ExtraMetadata)>, QLightError>;

    fn is_sender(&self, hash: &EncryptedPayloadHash) -> Result<bool, QLightError>;
}

/// Resolution of privacy scopes and their state roots.
pub trait PrivateStateManager: Send + Sync {
    fn resolve_for_psi(&self, psi: &str) -> Result<PrivateStateMetadata, QLightError>;

    /// Private state root of `psi` in the state committed under `public_root`.
    fn private_state_root(&self, public_root: &Hash, psi: &str) -> Result<Hash, QLightError>;
}

/// Local mapping from public state roots to private state roots (client side).
pub trait PrivateStateRootStore: Send + Sync {
    fn private_state_root(&self, public_root: &Hash) -> Option<Hash>;
}

/// Result of authenticating a bearer token.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthToken {
    /// Raw granted authorities, e.g. `p2p://qlight`.
    pub authorities: Vec<String>,
    /// Privacy scopes the token may act for.
    pub psis: Vec<String>,
}

impl AuthToken {
    pub fn has_authority(&self, raw: &str) -> bool {
        self.authorities.iter().any(|a| a == raw)
    }

    pub fn is_psi_authorized(&self, psi: &str) -> bool {
        self.psis.iter().any(|p| p == psi)
    }
}

/// Security plugin that validates bearer tokens.
pub trait AuthenticationManager: Send + Sync {
    fn is_enabled(&self) -> Result<bool, QLightError>;

    fn authenticate(&self, token: &str) -> Result<AuthToken, QLightError>;
}

/// Token issuer used by clients to refresh their credentials.
pub trait TokenRefresher: Send + Sync {
    fn refresh_token(&self, current: &str, psi: &str) -> Result<String, QLightError>;

    /// How long before expiry a refresh should happen.
    fn refresh_anticipation_ms(&self) -> i64;
}

/// Pushes a refreshed token to every running server connection.
#[async_trait]
pub trait RunningPeerAuthUpdater: Send + Sync {
    async fn update_token_for_running_peers(&self, token: &str) -> Result<(), QLightError>;
}
