//! # QLight Server Handler
//!
//! Accepts qlight clients, serves them headers, bodies, pooled transactions
//! and the private payloads of their privacy scope, and pushes new heads and
//! pooled transactions to them.
//!
//! ## Security
//!
//! - Servers refuse other servers during the qlight handshake
//! - Every client is authorized before registration and re-authorized
//!   periodically; failures disconnect with an auth-specific reason
//! - Private payloads are resolved per peer scope, never shared across scopes

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{short_hex, Block, Body, Hash, Header, Transaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::{local_status, node_info, NodeInfo, PeerWaitGroup};
use crate::auth::{run_periodic_auth_check, AuthProvider};
use crate::config::QLightConfig;
use crate::dispatcher::{run_message_loop, MessageHandler, RoutingTable, ServerRoute};
use crate::domain::{
    BlockPrivateData, GetBlockHeadersPacket, HashOrNumber, Msg, Packet, Role, TokenUpdatePacket,
    ETH65,
};
use crate::events::QLightError;
use crate::peer::{handshake, qlight_handshake, Peer, PeerInfo, QueueOutcome};
use crate::peer_set::{BroadcastMode, PeerSet};
use crate::ports::{ChainBackend, TxPool};
use crate::resolver::PrivateBlockDataResolver;

/// Per-peer transaction batch assembled by a broadcast.
#[derive(Default)]
struct TxBatch {
    full: Vec<Transaction>,
    hashes: Vec<Hash>,
}

pub struct QLightServerHandler {
    config: QLightConfig,
    chain: Arc<dyn ChainBackend>,
    tx_pool: Arc<dyn TxPool>,
    resolver: Arc<PrivateBlockDataResolver>,
    auth: Arc<dyn AuthProvider>,
    peers: Arc<PeerSet>,
    routes: RoutingTable<ServerRoute>,
    max_peers: AtomicUsize,
    peer_wg: PeerWaitGroup,
    quit: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl QLightServerHandler {
    pub fn new(
        config: QLightConfig,
        chain: Arc<dyn ChainBackend>,
        tx_pool: Arc<dyn TxPool>,
        resolver: Arc<PrivateBlockDataResolver>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let (quit, _) = watch::channel(false);
        Self {
            max_peers: AtomicUsize::new(config.max_peers),
            config,
            chain,
            tx_pool,
            resolver,
            auth,
            peers: Arc::new(PeerSet::new(BroadcastMode::Enabled)),
            routes: RoutingTable::server(),
            peer_wg: PeerWaitGroup::default(),
            quit,
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    pub fn node_info(&self) -> NodeInfo {
        node_info(self.config.network_id, self.chain.as_ref())
    }

    pub fn peer_info(&self, id: &str) -> Option<PeerInfo> {
        self.peers.peer(id).map(|peer| peer.info())
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Subscribes to new heads and pooled transactions, spawns the broadcast
    /// loops and initializes the auth provider.
    pub fn start(self: &Arc<Self>, max_peers: usize) {
        self.max_peers.store(max_peers, Ordering::Relaxed);

        let txs = self.tx_pool.subscribe_new_txs();
        let heads = self.chain.subscribe_chain_head();
        {
            let mut loops = self.loops.lock();
            loops.push(tokio::spawn(
                self.clone().tx_broadcast_loop(txs, self.quit.subscribe()),
            ));
            loops.push(tokio::spawn(
                self.clone().block_broadcast_loop(heads, self.quit.subscribe()),
            ));
        }

        if let Err(e) = self.auth.initialize() {
            error!(error = %e, "[qlight] Failed to initialize auth provider");
        }
        info!(max_peers, "[qlight] Server protocol started");
    }

    /// Stops the broadcast loops, disconnects every peer and waits for the
    /// running sessions to exit.
    pub async fn stop(&self) {
        self.quit.send_replace(true);
        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            let _ = handle.await;
        }
        self.peers.close().await;
        self.peer_wg.wait().await;
        info!("[qlight] Server protocol stopped");
    }

    async fn tx_broadcast_loop(
        self: Arc<Self>,
        mut txs: broadcast::Receiver<Vec<Transaction>>,
        mut quit: watch::Receiver<bool>,
    ) {
        loop {
            let batch = tokio::select! {
                biased;
                _ = quit.wait_for(|quit| *quit) => return,
                batch = txs.recv() => batch,
            };
            match batch {
                Ok(batch) => {
                    self.broadcast_transactions(&batch, false);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "[qlight] Transaction broadcast lagging behind the pool");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    async fn block_broadcast_loop(
        self: Arc<Self>,
        mut heads: broadcast::Receiver<Block>,
        mut quit: watch::Receiver<bool>,
    ) {
        loop {
            let head = tokio::select! {
                biased;
                _ = quit.wait_for(|quit| *quit) => return,
                head = heads.recv() => head,
            };
            match head {
                Ok(block) => {
                    debug!(
                        number = block.number(),
                        hash = %short_hex(&block.hash()),
                        "[qlight] Announcing block to peers"
                    );
                    self.broadcast_block(&block);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "[qlight] Block broadcast lagging behind the chain");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    // =========================================================================
    // PEER SESSIONS
    // =========================================================================

    /// Runs one client connection until it ends. Always returns the error
    /// that tore the connection down.
    pub async fn run_peer(self: &Arc<Self>, peer: Arc<Peer>) -> Result<(), QLightError> {
        let _session = self.peer_wg.enter();

        if let Err(e) = self.admit_peer(&peer).await {
            peer.disconnect(e.disconnect_reason()).await;
            return Err(e);
        }

        let err = self.serve_peer(&peer).await;
        debug!(peer = %peer.id(), error = %err, "[qlight] Peer session ended");
        peer.disconnect(err.disconnect_reason()).await;
        self.remove_peer(peer.id());
        Err(err)
    }

    async fn admit_peer(&self, peer: &Arc<Peer>) -> Result<(), QLightError> {
        let timeout = self.config.handshake_timeout();
        let max_size = self.config.max_message_size;
        let (status, head_number) = local_status(&self.config, self.chain.as_ref());

        if let Err(e) = handshake(peer, &status, head_number, max_size, timeout).await {
            debug!(peer = %peer.id(), error = %e, "[qlight] Base handshake failed");
            peer.signal_base_disconnected();
            return Err(e);
        }
        if let Err(e) = qlight_handshake(peer, Role::Server, "", "", max_size, timeout).await {
            info!(peer = %peer.id(), error = %e, "[qlight] QLight handshake failed");
            peer.signal_base_disconnected();
            return Err(e);
        }

        let max_peers = self.max_peers.load(Ordering::Relaxed);
        if !peer.is_trusted() && self.peers.len() >= max_peers {
            return Err(QLightError::TooManyPeers);
        }

        if let Err(e) = self.auth.authorize(&peer.token(), &peer.psi()) {
            error!(peer = %peer.id(), psi = %peer.psi(), error = %e, "[qlight] Auth error");
            return Err(match e {
                QLightError::Unauthorized(_) => e,
                other => QLightError::Unauthorized(other.to_string()),
            });
        }

        if let Err(e) = self
            .peers
            .register_with_limit(peer.clone(), max_peers, peer.is_trusted())
        {
            error!(peer = %peer.id(), error = %e, "[qlight] Peer registration failed");
            peer.signal_base_disconnected();
            return Err(e);
        }
        info!(peer = %peer.id(), psi = %peer.psi(), "[qlight] Client connected");
        Ok(())
    }

    async fn serve_peer(self: &Arc<Self>, peer: &Arc<Peer>) -> QLightError {
        tokio::spawn(run_periodic_auth_check(
            peer.clone(),
            self.auth.clone(),
            self.config.auth_check_interval(),
        ));
        self.sync_transactions(peer);
        run_message_loop(&**self, peer, self.config.max_message_size).await
    }

    fn remove_peer(&self, id: &str) {
        match self.peers.unregister(id) {
            Ok(_) => debug!(peer = %id, "[qlight] Removed client peer"),
            Err(e) => debug!(peer = %id, error = %e, "[qlight] Client peer already removed"),
        }
    }

    /// Hands the current pool contents to a freshly registered peer.
    fn sync_transactions(&self, peer: &Peer) {
        let pending = self.tx_pool.pending();
        if pending.is_empty() {
            return;
        }
        let outcome = if peer.version() >= ETH65 {
            peer.async_send_pooled_transaction_hashes(pending.iter().map(Transaction::hash).collect())
        } else {
            peer.async_send_transactions(pending)
        };
        trace!(peer = %peer.id(), ?outcome, "[qlight] Synced pooled transactions");
    }

    // =========================================================================
    // BROADCAST
    // =========================================================================

    /// Queues `block` with each client's private payloads to every client
    /// that does not know it yet. Returns the number of peers it was queued for.
    pub fn broadcast_block(&self, block: &Block) -> usize {
        let hash = block.hash();
        let parent = block.parent_hash();
        let parent_td = block.number().checked_sub(1).and_then(|parent_number| {
            self.chain
                .block(&parent, parent_number)
                .and_then(|_| self.chain.total_difficulty(&parent, parent_number))
        });
        let Some(parent_td) = parent_td else {
            error!(
                number = block.number(),
                hash = %short_hex(&hash),
                "[qlight] Propagating dangling block"
            );
            return 0;
        };
        let td = parent_td + block.difficulty();

        let peers: Vec<Arc<Peer>> = self
            .peers
            .peers_without_block(&hash)
            .into_iter()
            .filter(|peer| !peer.is_server())
            .collect();

        let mut queued = 0;
        for peer in &peers {
            let psi = peer.psi();
            let private_data = match self.resolver.prepare_block_private_data(block, &psi) {
                Ok(data) => data,
                Err(e) => {
                    error!(
                        number = block.number(),
                        hash = %short_hex(&hash),
                        psi = %psi,
                        error = %e,
                        "[qlight] Unable to prepare private data for block"
                    );
                    return queued;
                }
            };
            if peer.async_send_new_block(block.clone(), td, private_data) == QueueOutcome::Queued {
                queued += 1;
            }
        }
        trace!(hash = %short_hex(&hash), recipients = peers.len(), queued, "[qlight] Propagated block");
        queued
    }

    /// Queues `txs` to every client lacking them.
    ///
    /// With `propagate` every client gets the full transactions; otherwise
    /// clients on version 65 or later get hash announcements and older ones
    /// the full transactions. Returns the number of peers a batch was queued for.
    pub fn broadcast_transactions(&self, txs: &[Transaction], propagate: bool) -> usize {
        let mut batches: HashMap<String, (Arc<Peer>, TxBatch)> = HashMap::new();
        for tx in txs {
            let hash = tx.hash();
            for peer in self.peers.peers_without_transaction(&hash) {
                if peer.is_server() {
                    continue;
                }
                let full = propagate || peer.version() < ETH65;
                let (_, batch) = batches
                    .entry(peer.id().to_string())
                    .or_insert_with(|| (peer.clone(), TxBatch::default()));
                if full {
                    batch.full.push(tx.clone());
                } else {
                    batch.hashes.push(hash);
                }
            }
        }

        let mut reached = 0;
        for (_, (peer, batch)) in batches {
            let mut queued = false;
            if !batch.full.is_empty() {
                queued |= peer.async_send_transactions(batch.full) == QueueOutcome::Queued;
            }
            if !batch.hashes.is_empty() {
                queued |= peer.async_send_pooled_transaction_hashes(batch.hashes) == QueueOutcome::Queued;
            }
            if queued {
                reached += 1;
            }
        }
        trace!(count = txs.len(), peers = reached, "[qlight] Broadcast transactions");
        reached
    }

    // =========================================================================
    // SERVING
    // =========================================================================

    /// Bodies of the requested blocks plus the private payloads `peer` may see.
    pub fn answer_get_block_bodies(
        &self,
        peer: &Peer,
        hashes: &[Hash],
    ) -> Result<(Vec<Body>, Vec<BlockPrivateData>), QLightError> {
        let psi = peer.psi();
        let mut bytes = 0usize;
        let mut bodies = Vec::new();
        let mut private = Vec::new();

        for (lookups, hash) in hashes.iter().enumerate() {
            if bytes >= self.config.soft_response_limit
                || bodies.len() >= self.config.max_bodies_serve
                || lookups >= self.config.max_body_lookups()
            {
                break;
            }
            let Some(block) = self.chain.block_by_hash(hash) else {
                continue;
            };
            match self.resolver.prepare_block_private_data(&block, &psi) {
                Ok(Some(data)) => private.push(data),
                Ok(None) => {}
                Err(e) => {
                    return Err(QLightError::PrivateDataResolution(format!(
                        "block {}: {}",
                        short_hex(hash),
                        e
                    )))
                }
            }
            let body = block.body();
            bytes += bincode::serialized_size(&body).map(|n| n as usize).unwrap_or(0);
            bodies.push(body);
        }
        Ok((bodies, private))
    }

    async fn handle_get_block_bodies(&self, peer: &Peer, hashes: &[Hash]) -> Result<(), QLightError> {
        let (bodies, private) = match self.answer_get_block_bodies(peer, hashes) {
            Ok(answer) => answer,
            Err(e @ QLightError::PrivateDataResolution(_)) => {
                error!(peer = %peer.id(), error = %e, "[qlight] Dropping block bodies reply");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !private.is_empty() {
            peer.send_block_private_data(private).await?;
        }
        peer.send_block_bodies(bodies).await
    }

    /// Headers matching `query`, walking the canonical chain by number.
    pub fn answer_get_block_headers(&self, query: &GetBlockHeadersPacket) -> Vec<Header> {
        let limit = query.amount.min(self.config.max_headers_serve);
        let step = query.skip.saturating_add(1);
        let mut headers = Vec::new();
        let mut bytes = 0usize;

        let mut next = match query.origin {
            HashOrNumber::Hash(hash) => self.chain.header_by_hash(&hash),
            HashOrNumber::Number(number) => self.chain.header_by_number(number),
        };
        while let Some(header) = next {
            if headers.len() as u64 >= limit || bytes >= self.config.soft_response_limit {
                break;
            }
            let number = header.number;
            bytes += bincode::serialized_size(&header).map(|n| n as usize).unwrap_or(0);
            headers.push(header);

            let following = if query.reverse {
                number.checked_sub(step)
            } else {
                number.checked_add(step)
            };
            next = following.and_then(|n| self.chain.header_by_number(n));
        }
        headers
    }

    /// Pooled transactions among `hashes`, up to the soft response limit.
    pub fn answer_get_pooled_transactions(&self, hashes: &[Hash]) -> Vec<Transaction> {
        let mut bytes = 0usize;
        let mut txs = Vec::new();
        for hash in hashes {
            if bytes >= self.config.soft_response_limit {
                break;
            }
            if let Some(tx) = self.tx_pool.get(hash) {
                bytes += bincode::serialized_size(&tx).map(|n| n as usize).unwrap_or(0);
                txs.push(tx);
            }
        }
        txs
    }
}

#[async_trait]
impl MessageHandler for QLightServerHandler {
    async fn handle_msg(&self, peer: &Arc<Peer>, msg: Msg) -> Result<(), QLightError> {
        match self.routes.route(msg.code)? {
            ServerRoute::ExtraStatus => Err(QLightError::ExtraStatusMsg),
            ServerRoute::Ignore => {
                Packet::decode(&msg)?;
                trace!(peer = %peer.id(), code = msg.code, "[qlight] Ignoring client-only message");
                Ok(())
            }
            ServerRoute::ServeHeaders => {
                let query: GetBlockHeadersPacket = msg.decode()?;
                let headers = self.answer_get_block_headers(&query);
                peer.send_block_headers(headers).await
            }
            ServerRoute::ServeBodies => {
                let hashes: Vec<Hash> = msg.decode()?;
                self.handle_get_block_bodies(peer, &hashes).await
            }
            ServerRoute::ServePooledTransactions => {
                let hashes: Vec<Hash> = msg.decode()?;
                let txs = self.answer_get_pooled_transactions(&hashes);
                peer.send_pooled_transactions(txs).await
            }
            ServerRoute::TokenUpdate => {
                let update: TokenUpdatePacket = msg.decode()?;
                debug!(peer = %peer.id(), "[qlight] Client token updated");
                peer.set_token(update.token);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        MemoryChain, MemoryPrivateStateManager, MemoryPrivateTxManager, MemoryTransport,
        MemoryTxPool,
    };
    use crate::auth::DefaultAuthProvider;
    use crate::domain::{ExtraMetadata, PrivateStateMetadata};
    use crate::peer::PeerLimits;
    use crate::ports::MsgReadWriter;
    use shared_types::{EncryptedPayloadHash, U256};

    struct Fixture {
        chain: Arc<MemoryChain>,
        pool: Arc<MemoryTxPool>,
        ptm: Arc<MemoryPrivateTxManager>,
        server: Arc<QLightServerHandler>,
    }

    fn child(parent: &Block, txs: Vec<Transaction>) -> Block {
        Block::new(
            Header {
                parent_hash: parent.hash(),
                number: parent.number() + 1,
                difficulty: U256::from(2u64),
                gas_limit: 1_000_000,
                ..Default::default()
            },
            txs,
            vec![],
        )
    }

    fn fixture(config: QLightConfig) -> Fixture {
        let genesis = Block::new(
            Header {
                difficulty: U256::from(1u64),
                gas_limit: 1_000_000,
                ..Default::default()
            },
            vec![],
            vec![],
        );
        let chain = Arc::new(MemoryChain::new(genesis));
        let pool = Arc::new(MemoryTxPool::default());
        let psm = Arc::new(MemoryPrivateStateManager::default());
        psm.add_scope(PrivateStateMetadata::new("psi1", vec!["A1".into()]));
        let ptm = Arc::new(MemoryPrivateTxManager::default());
        let resolver = Arc::new(PrivateBlockDataResolver::new(psm.clone(), ptm.clone()));
        let auth = Arc::new(DefaultAuthProvider::new(psm, None));
        let server = Arc::new(QLightServerHandler::new(
            config,
            chain.clone(),
            pool.clone(),
            resolver,
            auth,
        ));
        Fixture {
            chain,
            pool,
            ptm,
            server,
        }
    }

    fn client_peer(id: &str, version: u32, psi: &str) -> (Arc<Peer>, MemoryTransport) {
        let (local, remote) = MemoryTransport::pipe();
        let peer = Arc::new(Peer::new(id, version, Arc::new(local), false, PeerLimits::default()));
        peer.set_qlight_status(false, psi.to_string(), String::new());
        (peer, remote)
    }

    fn private_tx(ptm: &MemoryPrivateTxManager, tag: &[u8], party: &str) -> Transaction {
        let hash = EncryptedPayloadHash::from_slice(tag);
        ptm.store(
            hash,
            tag.to_vec(),
            ExtraMetadata {
                sender: party.into(),
                managed_parties: vec![party.into()],
                ..Default::default()
            },
        );
        Transaction::new_private(0, None, hash)
    }

    #[tokio::test]
    async fn test_dangling_block_is_not_broadcast() {
        let fx = fixture(QLightConfig::for_testing());
        let (peer, _remote) = client_peer("c1", 65, "psi1");
        fx.server.peers().register(peer.clone()).unwrap();

        let orphan = Block::new(
            Header {
                parent_hash: [0xEE; 32],
                number: 5,
                gas_limit: 1_000_000,
                ..Default::default()
            },
            vec![],
            vec![],
        );
        assert_eq!(fx.server.broadcast_block(&orphan), 0);
        assert!(!peer.known_block(&orphan.hash()));
    }

    #[tokio::test]
    async fn test_block_broadcast_skips_servers_and_known() {
        let fx = fixture(QLightConfig::for_testing());
        let block = child(&fx.chain.head_block(), vec![]);

        let (client, _r1) = client_peer("c1", 65, "psi1");
        let (other_server, _r2) = client_peer("s2", 65, "");
        other_server.set_qlight_status(true, String::new(), String::new());
        let (knows, _r3) = client_peer("c3", 65, "psi1");
        knows.mark_block(block.hash());
        for peer in [&client, &other_server, &knows] {
            fx.server.peers().register(peer.clone()).unwrap();
        }

        assert_eq!(fx.server.broadcast_block(&block), 1);
        assert!(client.known_block(&block.hash()));
        assert!(!other_server.known_block(&block.hash()));
    }

    #[tokio::test]
    async fn test_block_broadcast_carries_td_and_private_data() {
        let fx = fixture(QLightConfig::for_testing());
        let tx = private_tx(&fx.ptm, b"p1", "A1");
        let block = child(&fx.chain.head_block(), vec![tx]);
        let (peer, remote) = client_peer("c1", 65, "psi1");
        fx.server.peers().register(peer).unwrap();

        assert_eq!(fx.server.broadcast_block(&block), 1);

        match Packet::decode(&remote.read_msg().await.unwrap()).unwrap() {
            Packet::BlockPrivateData(batches) => {
                assert_eq!(batches.len(), 1);
                assert_eq!(batches[0].private_transactions.len(), 1);
            }
            other => panic!("unexpected packet {:?}", other),
        }
        match Packet::decode(&remote.read_msg().await.unwrap()).unwrap() {
            Packet::NewBlock(p) => assert_eq!(p.td, U256::from(3u64)),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transaction_broadcast_by_version() {
        let fx = fixture(QLightConfig::for_testing());
        let (new_peer, _r1) = client_peer("c65", 65, "psi1");
        let (old_peer, _r2) = client_peer("c64", 64, "psi1");
        fx.server.peers().register(new_peer.clone()).unwrap();
        fx.server.peers().register(old_peer.clone()).unwrap();

        let tx = Transaction::new_public(0, None, U256::one(), vec![]);
        assert_eq!(fx.server.broadcast_transactions(&[tx.clone()], false), 2);
        assert!(new_peer.known_transaction(&tx.hash()));
        assert!(old_peer.known_transaction(&tx.hash()));

        assert_eq!(fx.server.broadcast_transactions(&[tx], true), 0);
    }

    #[test]
    fn test_bodies_respect_serve_cap() {
        let fx = fixture(QLightConfig {
            max_bodies_serve: 2,
            ..QLightConfig::for_testing()
        });
        let mut hashes = Vec::new();
        for _ in 0..3 {
            let block = child(&fx.chain.head_block(), vec![]);
            hashes.push(block.hash());
            fx.chain.insert_block(block);
        }
        let (peer, _remote) = client_peer("c1", 65, "psi1");

        let (bodies, private) = fx.server.answer_get_block_bodies(&peer, &hashes).unwrap();
        assert_eq!(bodies.len(), 2);
        assert!(private.is_empty());
    }

    #[test]
    fn test_bodies_lookup_cap_counts_misses() {
        let fx = fixture(QLightConfig {
            max_bodies_serve: 1,
            ..QLightConfig::for_testing()
        });
        let block = child(&fx.chain.head_block(), vec![]);
        fx.chain.insert_block(block.clone());
        let (peer, _remote) = client_peer("c1", 65, "psi1");

        let hashes = vec![[0x01; 32], [0x02; 32], block.hash()];
        let (bodies, _) = fx.server.answer_get_block_bodies(&peer, &hashes).unwrap();
        assert!(bodies.is_empty());
    }

    #[test]
    fn test_bodies_with_unknown_scope_fail() {
        let fx = fixture(QLightConfig::for_testing());
        let block = child(&fx.chain.head_block(), vec![]);
        fx.chain.insert_block(block.clone());
        let (peer, _remote) = client_peer("c1", 65, "ghost");
        assert!(matches!(
            fx.server.answer_get_block_bodies(&peer, &[block.hash()]),
            Err(QLightError::PrivateDataResolution(_))
        ));
    }

    #[test]
    fn test_headers_query_walks_with_skip() {
        let fx = fixture(QLightConfig::for_testing());
        for _ in 0..6 {
            fx.chain.insert_block(child(&fx.chain.head_block(), vec![]));
        }
        let forward = fx.server.answer_get_block_headers(&GetBlockHeadersPacket {
            origin: HashOrNumber::Number(1),
            amount: 3,
            skip: 1,
            reverse: false,
        });
        let numbers: Vec<u64> = forward.iter().map(|h| h.number).collect();
        assert_eq!(numbers, vec![1, 3, 5]);

        let head = fx.chain.head_block();
        let reverse = fx.server.answer_get_block_headers(&GetBlockHeadersPacket {
            origin: HashOrNumber::Hash(head.hash()),
            amount: 10,
            skip: 0,
            reverse: true,
        });
        assert_eq!(reverse.len(), 7);
        assert_eq!(reverse.last().map(|h| h.number), Some(0));
    }

    #[test]
    fn test_pooled_transactions_served_from_pool() {
        let fx = fixture(QLightConfig::for_testing());
        let tx = Transaction::new_public(0, None, U256::one(), vec![]);
        fx.pool.add(vec![tx.clone()]);
        let txs = fx.server.answer_get_pooled_transactions(&[tx.hash(), [0x09; 32]]);
        assert_eq!(txs, vec![tx]);
    }

    #[tokio::test]
    async fn test_token_update_replaces_peer_token() {
        let fx = fixture(QLightConfig::for_testing());
        let (peer, _remote) = client_peer("c1", 65, "psi1");
        let msg = Packet::TokenUpdate(TokenUpdatePacket {
            token: "bearer fresh".into(),
        })
        .encode()
        .unwrap();
        fx.server.handle_msg(&peer, msg).await.unwrap();
        assert_eq!(peer.token(), "bearer fresh");
    }

    #[tokio::test]
    async fn test_extra_status_is_protocol_error() {
        let fx = fixture(QLightConfig::for_testing());
        let (peer, _remote) = client_peer("c1", 65, "psi1");
        let msg = Packet::QLightStatus(Default::default()).encode().unwrap();
        assert!(matches!(
            fx.server.handle_msg(&peer, msg).await,
            Err(QLightError::ExtraStatusMsg)
        ));
    }
}
