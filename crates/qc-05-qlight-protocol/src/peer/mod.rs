//! # Peer Runtime
//!
//! Per-connection state of a qlight peer: negotiated role, de-duplication
//! sets, bounded broadcast queues and the termination signal every
//! background task of the connection selects on.
//!
//! ## Tasks per connection
//!
//! ```text
//!            ┌── message loop (single reader, dispatcher)
//! transport ─┼── block send loop  ◄── block queue (cap 4)
//!            ├── tx send loop     ◄── tx queue    (cap 4)
//!            └── periodic auth check (server side)
//! ```

mod broadcast;
mod handshake;

pub use handshake::{handshake, qlight_handshake};
pub(crate) use broadcast::spawn_send_loops;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use shared_types::{short_hex, Block, Body, Hash, Header, Transaction, U256, ZERO_HASH};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::config::QLightConfig;
use crate::domain::{
    BlockPrivateData, GetBlockHeadersPacket, KnownSet, Msg, NewBlockPacket, Packet,
    TokenUpdatePacket,
};
use crate::events::{DisconnectReason, QLightError};
use crate::ports::MsgReadWriter;

/// A one-shot broadcast flag, fired at most once.
#[derive(Clone)]
pub struct TermSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for TermSignal {
    fn default() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl TermSignal {
    /// Fires the signal. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has fired.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// Outcome of an asynchronous (queued) send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Handed to the send loop.
    Queued,
    /// The peer already has it; nothing queued.
    AlreadyKnown,
    /// Queue full or peer closing; dropped.
    Dropped,
}

/// Queue and de-duplication limits of one peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerLimits {
    pub max_known_blocks: usize,
    pub max_known_txs: usize,
    pub max_queued_blocks: usize,
    pub max_queued_tx_batches: usize,
}

impl Default for PeerLimits {
    fn default() -> Self {
        Self::from(&QLightConfig::default())
    }
}

impl From<&QLightConfig> for PeerLimits {
    fn from(config: &QLightConfig) -> Self {
        Self {
            max_known_blocks: config.max_known_blocks,
            max_known_txs: config.max_known_txs,
            max_queued_blocks: config.max_queued_blocks.max(1),
            max_queued_tx_batches: config.max_queued_tx_batches.max(1),
        }
    }
}

/// A block queued for propagation, with the receiver's private payloads.
#[derive(Debug)]
pub(crate) struct BlockPropagation {
    pub block: Block,
    pub td: U256,
    pub private_data: Option<BlockPrivateData>,
}

/// A transaction batch queued for a peer.
#[derive(Debug)]
pub(crate) enum TxBroadcast {
    Full(Vec<Transaction>),
    Announce(Vec<Hash>),
}

type QueueReceivers = (
    mpsc::Receiver<BlockPropagation>,
    mpsc::Receiver<TxBroadcast>,
);

#[derive(Default)]
struct QLightState {
    server: bool,
    psi: String,
}

/// Diagnostics snapshot of a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub version: u32,
    pub difficulty: Option<U256>,
    pub head: String,
}

/// One connected qlight peer.
pub struct Peer {
    id: String,
    version: u32,
    trusted: bool,
    rw: Arc<dyn MsgReadWriter>,
    term: TermSignal,
    base_disconnected: TermSignal,
    disconnect_reason: Mutex<Option<DisconnectReason>>,
    qlight: RwLock<QLightState>,
    token: Mutex<String>,
    head: RwLock<(Hash, Option<U256>)>,
    known_blocks: KnownSet,
    known_txs: KnownSet,
    block_queue: mpsc::Sender<BlockPropagation>,
    tx_queue: mpsc::Sender<TxBroadcast>,
    receivers: Mutex<Option<QueueReceivers>>,
}

impl Peer {
    pub fn new(
        id: impl Into<String>,
        version: u32,
        rw: Arc<dyn MsgReadWriter>,
        trusted: bool,
        limits: PeerLimits,
    ) -> Self {
        let (block_queue, block_rx) = mpsc::channel(limits.max_queued_blocks.max(1));
        let (tx_queue, tx_rx) = mpsc::channel(limits.max_queued_tx_batches.max(1));
        Self {
            id: id.into(),
            version,
            trusted,
            rw,
            term: TermSignal::default(),
            base_disconnected: TermSignal::default(),
            disconnect_reason: Mutex::new(None),
            qlight: RwLock::new(QLightState::default()),
            token: Mutex::new(String::new()),
            head: RwLock::new((ZERO_HASH, None)),
            known_blocks: KnownSet::new(limits.max_known_blocks),
            known_txs: KnownSet::new(limits.max_known_txs),
            block_queue,
            tx_queue,
            receivers: Mutex::new(Some((block_rx, tx_rx))),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    // =========================================================================
    // NEGOTIATED QLIGHT STATE
    // =========================================================================

    pub fn is_server(&self) -> bool {
        self.qlight.read().server
    }

    pub fn psi(&self) -> String {
        self.qlight.read().psi.clone()
    }

    pub fn token(&self) -> String {
        self.token.lock().clone()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.lock() = token.into();
    }

    pub(crate) fn set_qlight_status(&self, server: bool, psi: String, token: String) {
        {
            let mut state = self.qlight.write();
            state.server = server;
            state.psi = psi;
        }
        self.set_token(token);
    }

    // =========================================================================
    // HEAD
    // =========================================================================

    pub fn head(&self) -> (Hash, Option<U256>) {
        *self.head.read()
    }

    pub fn td(&self) -> Option<U256> {
        self.head.read().1
    }

    pub fn set_head(&self, hash: Hash, td: Option<U256>) {
        *self.head.write() = (hash, td);
    }

    pub fn info(&self) -> PeerInfo {
        let (hash, td) = self.head();
        PeerInfo {
            version: self.version,
            difficulty: td,
            head: format!("0x{}", hex::encode(hash)),
        }
    }

    // =========================================================================
    // KNOWN SETS
    // =========================================================================

    pub fn known_block(&self, hash: &Hash) -> bool {
        self.known_blocks.contains(hash)
    }

    pub fn known_transaction(&self, hash: &Hash) -> bool {
        self.known_txs.contains(hash)
    }

    pub fn mark_block(&self, hash: Hash) {
        self.known_blocks.insert(hash);
    }

    pub fn mark_transaction(&self, hash: Hash) {
        self.known_txs.insert(hash);
    }

    // =========================================================================
    // QUEUED SENDS (never block)
    // =========================================================================

    /// Queues a block for propagation together with the peer's private payloads.
    pub fn async_send_new_block(
        &self,
        block: Block,
        td: U256,
        private_data: Option<BlockPrivateData>,
    ) -> QueueOutcome {
        let hash = block.hash();
        if self.term.is_fired() {
            return QueueOutcome::Dropped;
        }
        // Reserved before queueing, released again if the queue refuses it.
        if !self.known_blocks.insert(hash) {
            return QueueOutcome::AlreadyKnown;
        }
        let number = block.number();
        match self.block_queue.try_send(BlockPropagation {
            block,
            td,
            private_data,
        }) {
            Ok(()) => QueueOutcome::Queued,
            Err(_) => {
                self.known_blocks.remove(&hash);
                debug!(
                    peer = %self.id,
                    number,
                    hash = %short_hex(&hash),
                    "[qlight] Dropping block propagation"
                );
                QueueOutcome::Dropped
            }
        }
    }

    /// Queues full transactions the peer does not know yet.
    pub fn async_send_transactions(&self, txs: Vec<Transaction>) -> QueueOutcome {
        let fresh: Vec<Transaction> = txs
            .into_iter()
            .filter(|tx| !self.known_txs.contains(&tx.hash()))
            .collect();
        if fresh.is_empty() {
            return QueueOutcome::AlreadyKnown;
        }
        let hashes: Vec<Hash> = fresh.iter().map(Transaction::hash).collect();
        self.queue_txs(TxBroadcast::Full(fresh), hashes)
    }

    /// Queues hash announcements for transactions the peer does not know yet.
    pub fn async_send_pooled_transaction_hashes(&self, hashes: Vec<Hash>) -> QueueOutcome {
        let fresh: Vec<Hash> = hashes
            .into_iter()
            .filter(|hash| !self.known_txs.contains(hash))
            .collect();
        if fresh.is_empty() {
            return QueueOutcome::AlreadyKnown;
        }
        self.queue_txs(TxBroadcast::Announce(fresh.clone()), fresh)
    }

    fn queue_txs(&self, batch: TxBroadcast, hashes: Vec<Hash>) -> QueueOutcome {
        if self.term.is_fired() {
            return QueueOutcome::Dropped;
        }
        match self.tx_queue.try_send(batch) {
            Ok(()) => {
                for hash in hashes {
                    self.known_txs.insert(hash);
                }
                QueueOutcome::Queued
            }
            Err(_) => {
                debug!(peer = %self.id, count = hashes.len(), "[qlight] Dropping transaction broadcast");
                QueueOutcome::Dropped
            }
        }
    }

    pub(crate) fn take_queue_receivers(&self) -> Option<QueueReceivers> {
        self.receivers.lock().take()
    }

    // =========================================================================
    // DIRECT SENDS
    // =========================================================================

    pub(crate) async fn send_packet(&self, packet: &Packet) -> Result<(), QLightError> {
        let msg = packet.encode()?;
        self.rw.write_msg(msg).await
    }

    pub(crate) async fn read_msg(&self) -> Result<Msg, QLightError> {
        self.rw.read_msg().await
    }

    pub async fn send_new_block(&self, block: Block, td: U256) -> Result<(), QLightError> {
        self.known_blocks.insert(block.hash());
        self.send_packet(&Packet::NewBlock(NewBlockPacket { block, td }))
            .await
    }

    pub async fn send_block_private_data(
        &self,
        data: Vec<BlockPrivateData>,
    ) -> Result<(), QLightError> {
        self.send_packet(&Packet::BlockPrivateData(data)).await
    }

    pub async fn send_block_bodies(&self, bodies: Vec<Body>) -> Result<(), QLightError> {
        self.send_packet(&Packet::BlockBodies(bodies)).await
    }

    pub async fn send_block_headers(&self, headers: Vec<Header>) -> Result<(), QLightError> {
        self.send_packet(&Packet::BlockHeaders(headers)).await
    }

    pub async fn send_transactions(&self, txs: Vec<Transaction>) -> Result<(), QLightError> {
        for tx in &txs {
            self.known_txs.insert(tx.hash());
        }
        self.send_packet(&Packet::Transactions(txs)).await
    }

    pub async fn send_pooled_transactions(&self, txs: Vec<Transaction>) -> Result<(), QLightError> {
        for tx in &txs {
            self.known_txs.insert(tx.hash());
        }
        self.send_packet(&Packet::PooledTransactions(txs)).await
    }

    pub async fn send_new_pooled_transaction_hashes(
        &self,
        hashes: Vec<Hash>,
    ) -> Result<(), QLightError> {
        for hash in &hashes {
            self.known_txs.insert(*hash);
        }
        self.send_packet(&Packet::NewPooledTransactionHashes(hashes))
            .await
    }

    pub async fn send_token_update(&self, token: &str) -> Result<(), QLightError> {
        self.send_packet(&Packet::TokenUpdate(TokenUpdatePacket {
            token: token.to_string(),
        }))
        .await
    }

    pub async fn request_block_bodies(&self, hashes: Vec<Hash>) -> Result<(), QLightError> {
        debug!(peer = %self.id, count = hashes.len(), "[qlight] Fetching batch of block bodies");
        self.send_packet(&Packet::GetBlockBodies(hashes)).await
    }

    pub async fn request_block_headers(
        &self,
        query: GetBlockHeadersPacket,
    ) -> Result<(), QLightError> {
        self.send_packet(&Packet::GetBlockHeaders(query)).await
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Fires the termination signal. Returns `true` for the call that fired it.
    pub fn close(&self) -> bool {
        self.term.fire()
    }

    pub fn is_closed(&self) -> bool {
        self.term.is_fired()
    }

    /// Resolves once the peer has been closed.
    pub async fn closed(&self) {
        self.term.wait().await
    }

    pub fn term_signal(&self) -> TermSignal {
        self.term.clone()
    }

    /// Records the first disconnect reason, closes the peer and its transport.
    pub async fn disconnect(&self, reason: DisconnectReason) {
        {
            let mut current = self.disconnect_reason.lock();
            if current.is_none() {
                *current = Some(reason);
            }
        }
        if self.close() {
            debug!(peer = %self.id, %reason, "[qlight] Disconnecting peer");
        }
        self.rw.close().await;
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        *self.disconnect_reason.lock()
    }

    /// Releases the base-protocol loop sharing this connection.
    pub fn signal_base_disconnected(&self) {
        self.base_disconnected.fire();
    }

    pub fn base_disconnected(&self) -> TermSignal {
        self.base_disconnected.clone()
    }
}
