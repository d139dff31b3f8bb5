//! In-memory collaborators for the loopback node and tests.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::{Block, EncryptedPayloadHash, ForkId, Hash, Header, Transaction, U256};
use std::collections::{HashMap, HashSet};
use tokio::sync::broadcast;

use crate::domain::{ExtraMetadata, Packet, PrivateStateMetadata};
use crate::events::QLightError;
use crate::ports::{
    AuthToken, AuthenticationManager, ChainBackend, ChainSync, PrivateStateManager,
    PrivateStateRootStore, PrivateTxManager, TokenRefresher, TxPool,
};

const FEED_CAPACITY: usize = 64;

// =============================================================================
// CHAIN
// =============================================================================

struct ChainState {
    by_hash: HashMap<Hash, Block>,
    canonical: Vec<Hash>,
    tds: HashMap<Hash, U256>,
}

/// A canonical chain kept in memory. Every inserted block extends the head.
pub struct MemoryChain {
    state: RwLock<ChainState>,
    fork_id: ForkId,
    heads: broadcast::Sender<Block>,
}

impl MemoryChain {
    pub fn new(genesis: Block) -> Self {
        let hash = genesis.hash();
        let td = genesis.difficulty();
        let mut by_hash = HashMap::new();
        by_hash.insert(hash, genesis);
        let (heads, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            state: RwLock::new(ChainState {
                by_hash,
                canonical: vec![hash],
                tds: HashMap::from([(hash, td)]),
            }),
            fork_id: ForkId::new(u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]), 0),
            heads,
        }
    }

    /// Appends `block` on top of its parent and announces it as the new head.
    ///
    /// A block whose parent is unknown is stored without a TD and without
    /// moving the head.
    pub fn insert_block(&self, block: Block) {
        let hash = block.hash();
        {
            let mut state = self.state.write();
            let parent_td = state.tds.get(&block.parent_hash()).copied();
            if let Some(parent_td) = parent_td {
                state.tds.insert(hash, parent_td + block.difficulty());
                let number = block.number() as usize;
                state.canonical.truncate(number);
                state.canonical.push(hash);
            }
            state.by_hash.insert(hash, block.clone());
        }
        let _ = self.heads.send(block);
    }

    /// Stores a block without touching the head or notifying subscribers.
    pub fn store_side_block(&self, block: Block) {
        self.state.write().by_hash.insert(block.hash(), block);
    }

    pub fn head_block(&self) -> Block {
        let state = self.state.read();
        state
            .canonical
            .last()
            .and_then(|hash| state.by_hash.get(hash))
            .cloned()
            .unwrap_or_default()
    }
}

impl ChainBackend for MemoryChain {
    fn genesis(&self) -> Block {
        let state = self.state.read();
        state
            .canonical
            .first()
            .and_then(|hash| state.by_hash.get(hash))
            .cloned()
            .unwrap_or_default()
    }

    fn current_header(&self) -> Header {
        self.head_block().header
    }

    fn total_difficulty(&self, hash: &Hash, _number: u64) -> Option<U256> {
        self.state.read().tds.get(hash).copied()
    }

    fn block(&self, hash: &Hash, number: u64) -> Option<Block> {
        self.block_by_hash(hash).filter(|b| b.number() == number)
    }

    fn block_by_hash(&self, hash: &Hash) -> Option<Block> {
        self.state.read().by_hash.get(hash).cloned()
    }

    fn header_by_hash(&self, hash: &Hash) -> Option<Header> {
        self.block_by_hash(hash).map(|b| b.header)
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        let state = self.state.read();
        state
            .canonical
            .get(number as usize)
            .and_then(|hash| state.by_hash.get(hash))
            .map(|b| b.header.clone())
    }

    fn fork_id(&self) -> ForkId {
        self.fork_id
    }

    fn chain_config(&self) -> serde_json::Value {
        serde_json::json!({ "chainId": 1337, "isQuorum": true })
    }

    fn subscribe_chain_head(&self) -> broadcast::Receiver<Block> {
        self.heads.subscribe()
    }
}

// =============================================================================
// TRANSACTION POOL
// =============================================================================

/// Insertion-ordered transaction pool.
pub struct MemoryTxPool {
    txs: RwLock<(HashMap<Hash, Transaction>, Vec<Hash>)>,
    feed: broadcast::Sender<Vec<Transaction>>,
}

impl Default for MemoryTxPool {
    fn default() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            txs: RwLock::new((HashMap::new(), Vec::new())),
            feed,
        }
    }
}

impl MemoryTxPool {
    /// Pools the transactions not seen before and publishes them.
    pub fn add(&self, txs: Vec<Transaction>) -> usize {
        let mut fresh = Vec::new();
        {
            let mut guard = self.txs.write();
            let (by_hash, order) = &mut *guard;
            for tx in txs {
                let hash = tx.hash();
                if by_hash.contains_key(&hash) {
                    continue;
                }
                by_hash.insert(hash, tx.clone());
                order.push(hash);
                fresh.push(tx);
            }
        }
        let added = fresh.len();
        if added > 0 {
            let _ = self.feed.send(fresh);
        }
        added
    }
}

impl TxPool for MemoryTxPool {
    fn has(&self, hash: &Hash) -> bool {
        self.txs.read().0.contains_key(hash)
    }

    fn get(&self, hash: &Hash) -> Option<Transaction> {
        self.txs.read().0.get(hash).cloned()
    }

    fn pending(&self) -> Vec<Transaction> {
        let guard = self.txs.read();
        guard
            .1
            .iter()
            .filter_map(|hash| guard.0.get(hash).cloned())
            .collect()
    }

    fn subscribe_new_txs(&self) -> broadcast::Receiver<Vec<Transaction>> {
        self.feed.subscribe()
    }
}

// =============================================================================
// PRIVACY
// =============================================================================

/// Private transaction manager backed by a map.
#[derive(Default)]
pub struct MemoryPrivateTxManager {
    payloads: RwLock<HashMap<EncryptedPayloadHash, (Vec<u8>, ExtraMetadata)>>,
    sent_by_us: RwLock<HashSet<EncryptedPayloadHash>>,
}

impl MemoryPrivateTxManager {
    pub fn store(&self, hash: EncryptedPayloadHash, payload: Vec<u8>, extra: ExtraMetadata) {
        self.payloads.write().insert(hash, (payload, extra));
    }

    pub fn mark_sender(&self, hash: EncryptedPayloadHash) {
        self.sent_by_us.write().insert(hash);
    }
}

impl PrivateTxManager for MemoryPrivateTxManager {
    fn receive(
        &self,
        hash: &EncryptedPayloadHash,
    ) -> Result<Option<(Vec<u8>, ExtraMetadata)>, QLightError> {
        Ok(self.payloads.read().get(hash).cloned())
    }

    fn is_sender(&self, hash: &EncryptedPayloadHash) -> Result<bool, QLightError> {
        Ok(self.sent_by_us.read().contains(hash))
    }
}

/// Private state manager backed by maps.
#[derive(Default)]
pub struct MemoryPrivateStateManager {
    scopes: RwLock<HashMap<String, PrivateStateMetadata>>,
    roots: RwLock<HashMap<(Hash, String), Hash>>,
}

impl MemoryPrivateStateManager {
    pub fn add_scope(&self, psm: PrivateStateMetadata) {
        self.scopes.write().insert(psm.id.clone(), psm);
    }

    pub fn set_private_state_root(&self, public_root: Hash, psi: &str, root: Hash) {
        self.roots.write().insert((public_root, psi.to_string()), root);
    }
}

impl PrivateStateManager for MemoryPrivateStateManager {
    fn resolve_for_psi(&self, psi: &str) -> Result<PrivateStateMetadata, QLightError> {
        self.scopes
            .read()
            .get(psi)
            .cloned()
            .ok_or_else(|| QLightError::PrivateDataResolution(format!("unknown PSI {}", psi)))
    }

    fn private_state_root(&self, public_root: &Hash, psi: &str) -> Result<Hash, QLightError> {
        self.roots
            .read()
            .get(&(*public_root, psi.to_string()))
            .copied()
            .ok_or_else(|| {
                QLightError::PrivateDataResolution(format!("no private state for PSI {}", psi))
            })
    }
}

/// Public-to-private state root mapping kept by a client.
#[derive(Default)]
pub struct MemoryPrivateStateRoots {
    roots: RwLock<HashMap<Hash, Hash>>,
}

impl MemoryPrivateStateRoots {
    pub fn insert(&self, public_root: Hash, private_root: Hash) {
        self.roots.write().insert(public_root, private_root);
    }
}

impl PrivateStateRootStore for MemoryPrivateStateRoots {
    fn private_state_root(&self, public_root: &Hash) -> Option<Hash> {
        self.roots.read().get(public_root).copied()
    }
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

/// Authentication manager with a fixed token table.
#[derive(Default)]
pub struct MemoryAuthManager {
    enabled: bool,
    tokens: RwLock<HashMap<String, AuthToken>>,
}

impl MemoryAuthManager {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn grant(&self, token: &str, auth: AuthToken) {
        self.tokens.write().insert(token.to_string(), auth);
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.write().remove(token);
    }
}

impl AuthenticationManager for MemoryAuthManager {
    fn is_enabled(&self) -> Result<bool, QLightError> {
        Ok(self.enabled)
    }

    fn authenticate(&self, token: &str) -> Result<AuthToken, QLightError> {
        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or_else(|| QLightError::Unauthorized("invalid token".into()))
    }
}

/// Token refresher that hands out a queue of preset tokens.
pub struct SequenceTokenRefresher {
    next: Mutex<Vec<String>>,
    anticipation_ms: i64,
}

impl SequenceTokenRefresher {
    pub fn new(tokens: Vec<String>, anticipation_ms: i64) -> Self {
        let mut next = tokens;
        next.reverse();
        Self {
            next: Mutex::new(next),
            anticipation_ms,
        }
    }
}

impl TokenRefresher for SequenceTokenRefresher {
    fn refresh_token(&self, current: &str, _psi: &str) -> Result<String, QLightError> {
        Ok(self.next.lock().pop().unwrap_or_else(|| current.to_string()))
    }

    fn refresh_anticipation_ms(&self) -> i64 {
        self.anticipation_ms
    }
}

// =============================================================================
// CHAIN SYNC
// =============================================================================

/// Chain sync that records the packets handed to it.
#[derive(Default)]
pub struct RecordingChainSync {
    packets: Mutex<Vec<(String, Packet)>>,
}

impl RecordingChainSync {
    pub fn packets(&self) -> Vec<(String, Packet)> {
        self.packets.lock().clone()
    }

    pub fn codes(&self) -> Vec<u64> {
        self.packets.lock().iter().map(|(_, p)| p.code()).collect()
    }
}

#[async_trait]
impl ChainSync for RecordingChainSync {
    async fn handle(&self, peer_id: &str, packet: Packet) -> Result<(), QLightError> {
        self.packets.lock().push((peer_id.to_string(), packet));
        Ok(())
    }
}
