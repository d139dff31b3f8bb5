//! # QLight Client Handler
//!
//! Keeps one connection to a trusted qlight server. Chain traffic is handed
//! to the chain-sync collaborator; private payloads pushed by the server are
//! merged into the [`PrivateClientCache`].
//!
//! The client never serves data and never broadcasts, so its peer set runs
//! without send loops.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{short_hex, Body, Transaction};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{local_status, node_info, NodeInfo, PeerWaitGroup};
use crate::client_cache::PrivateClientCache;
use crate::config::QLightConfig;
use crate::dispatcher::{run_message_loop, ClientRoute, MessageHandler, RoutingTable};
use crate::domain::{
    validate_new_block, BlockPrivateData, BlockVerdict, Msg, NewBlockPacket, Packet, Role,
};
use crate::events::QLightError;
use crate::peer::{handshake, qlight_handshake, Peer, PeerInfo};
use crate::peer_set::{BroadcastMode, PeerSet};
use crate::ports::{ChainBackend, ChainSync};
use crate::token_holder::TokenHolder;

/// A client is served by a single server.
const CLIENT_MAX_PEERS: usize = 1;

pub struct QLightClientHandler {
    config: QLightConfig,
    chain: Arc<dyn ChainBackend>,
    sync: Arc<dyn ChainSync>,
    cache: Arc<PrivateClientCache>,
    token_holder: Arc<TokenHolder>,
    peers: Arc<PeerSet>,
    routes: RoutingTable<ClientRoute>,
    peer_wg: PeerWaitGroup,
    quit: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl QLightClientHandler {
    pub fn new(
        config: QLightConfig,
        chain: Arc<dyn ChainBackend>,
        sync: Arc<dyn ChainSync>,
        cache: Arc<PrivateClientCache>,
        token_holder: Arc<TokenHolder>,
    ) -> Self {
        let (quit, _) = watch::channel(false);
        Self {
            config,
            chain,
            sync,
            cache,
            token_holder,
            peers: Arc::new(PeerSet::new(BroadcastMode::Disabled)),
            routes: RoutingTable::client(),
            peer_wg: PeerWaitGroup::default(),
            quit,
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    pub fn cache(&self) -> &Arc<PrivateClientCache> {
        &self.cache
    }

    pub fn token_holder(&self) -> &Arc<TokenHolder> {
        &self.token_holder
    }

    pub fn node_info(&self) -> NodeInfo {
        node_info(self.config.network_id, self.chain.as_ref())
    }

    pub fn peer_info(&self, id: &str) -> Option<PeerInfo> {
        self.peers.peer(id).map(|peer| peer.info())
    }

    /// Wires token pushes to the connected server and starts the token refresh loop.
    pub fn start(&self) {
        self.token_holder.set_peer_updater(self.peers.clone());
        let refresh = tokio::spawn(
            self.token_holder
                .clone()
                .run_refresh_loop(self.quit.subscribe()),
        );
        self.loops.lock().push(refresh);
        info!(psi = %self.token_holder.psi(), "[qlight] Client protocol started");
    }

    pub async fn stop(&self) {
        self.quit.send_replace(true);
        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            let _ = handle.await;
        }
        self.peers.close().await;
        self.peer_wg.wait().await;
        info!("[qlight] Client protocol stopped");
    }

    /// Runs the server connection until it ends. Always returns the error
    /// that tore the connection down.
    pub async fn run_peer(&self, peer: Arc<Peer>) -> Result<(), QLightError> {
        let _session = self.peer_wg.enter();

        if let Err(e) = self.admit_peer(&peer).await {
            peer.disconnect(e.disconnect_reason()).await;
            return Err(e);
        }

        let err = run_message_loop(self, &peer, self.config.max_message_size).await;
        debug!(peer = %peer.id(), error = %err, "[qlight] Server session ended");
        peer.disconnect(err.disconnect_reason()).await;
        if let Err(e) = self.peers.unregister(peer.id()) {
            debug!(peer = %peer.id(), error = %e, "[qlight] Server peer already removed");
        }
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
        let token = self.token_holder.current_token().await;
        let psi = self.token_holder.psi();
        if let Err(e) = qlight_handshake(peer, Role::Client, psi, &token, max_size, timeout).await {
            info!(peer = %peer.id(), error = %e, "[qlight] QLight handshake failed");
            peer.signal_base_disconnected();
            return Err(e);
        }

        if let Err(e) = self
            .peers
            .register_with_limit(peer.clone(), CLIENT_MAX_PEERS, peer.is_trusted())
        {
            error!(peer = %peer.id(), error = %e, "[qlight] Peer registration failed");
            peer.signal_base_disconnected();
            return Err(e);
        }
        info!(peer = %peer.id(), "[qlight] Connected to server");
        Ok(())
    }

    async fn handle_new_block(&self, peer: &Peer, packet: NewBlockPacket) -> Result<(), QLightError> {
        let verdict = validate_new_block(
            &packet,
            self.config.tolerate_invalid_block_roots,
            self.config.max_td_bits,
        )?;
        if let BlockVerdict::Ignore(mismatch) = verdict {
            warn!(
                peer = %peer.id(),
                number = packet.block.number(),
                reason = mismatch.as_str(),
                "[qlight] Ignoring propagated block"
            );
            return Ok(());
        }

        let block = &packet.block;
        self.cache.add_empty_entries(&block.transactions);
        peer.mark_block(block.hash());

        // The announced TD includes the block itself; the peer is only known
        // to have its parent until the block is imported.
        let true_td = packet.td.saturating_sub(block.difficulty());
        if peer.td().map_or(true, |td| true_td > td) {
            peer.set_head(block.parent_hash(), Some(true_td));
        }
        debug!(
            peer = %peer.id(),
            number = block.number(),
            hash = %short_hex(&block.hash()),
            "[qlight] Received propagated block"
        );
        self.sync.handle(peer.id(), Packet::NewBlock(packet)).await
    }
}

#[async_trait]
impl MessageHandler for QLightClientHandler {
    async fn handle_msg(&self, peer: &Arc<Peer>, msg: Msg) -> Result<(), QLightError> {
        match self.routes.route(msg.code)? {
            ClientRoute::ExtraStatus => Err(QLightError::ExtraStatusMsg),
            ClientRoute::Downstream => {
                let packet = Packet::decode(&msg)?;
                self.sync.handle(peer.id(), packet).await
            }
            ClientRoute::Bodies => {
                let bodies: Vec<Body> = msg.decode()?;
                for body in &bodies {
                    self.cache.add_empty_entries(&body.transactions);
                }
                self.sync.handle(peer.id(), Packet::BlockBodies(bodies)).await
            }
            ClientRoute::Transactions => {
                let txs: Vec<Transaction> = msg.decode()?;
                self.cache.add_empty_entries(&txs);
                for tx in &txs {
                    peer.mark_transaction(tx.hash());
                }
                self.sync.handle(peer.id(), Packet::Transactions(txs)).await
            }
            ClientRoute::NewBlock => {
                let packet: NewBlockPacket = msg.decode()?;
                self.handle_new_block(peer, packet).await
            }
            ClientRoute::PrivateData => {
                let batches: Vec<BlockPrivateData> = msg.decode()?;
                for batch in batches {
                    self.cache.add_private_block(batch);
                }
                Ok(())
            }
        }
    }
}
