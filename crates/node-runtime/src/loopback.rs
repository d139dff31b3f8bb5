//! # Loopback Node
//!
//! A qlight server and a qlight client in one process, joined by an
//! in-memory pipe. The server owns the producing chain and transaction
//! pool; the client imports every block the server propagates.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use qc_05_qlight_protocol::adapters::{
    MemoryChain, MemoryPrivateStateManager, MemoryPrivateStateRoots, MemoryPrivateTxManager,
    MemoryTransport, MemoryTxPool,
};
use qc_05_qlight_protocol::ports::{ChainBackend, ChainSync};
use qc_05_qlight_protocol::{
    DefaultAuthProvider, ExtraMetadata, Packet, Peer, PeerLimits, PrivateBlockDataResolver,
    PrivateClientCache, PrivateStateMetadata, QLightClientHandler, QLightConfig, QLightError,
    QLightServerHandler, TokenHolder,
};
use shared_types::{Block, EncryptedPayloadHash, Header, Transaction, U256};

/// Privacy scope used when the config leaves `[client] psi` empty.
pub const DEFAULT_PSI: &str = "private";

/// The single party of the loopback privacy scope.
const LOOPBACK_PARTY: &str = "loopback";

const GAS_LIMIT: u64 = 8_000_000;

/// Imports propagated blocks into the client's chain once their private
/// state root agrees with the one the server announced.
pub struct ImportingChainSync {
    chain: Arc<MemoryChain>,
    cache: Arc<PrivateClientCache>,
}

impl ImportingChainSync {
    pub fn new(chain: Arc<MemoryChain>, cache: Arc<PrivateClientCache>) -> Self {
        Self { chain, cache }
    }
}

#[async_trait]
impl ChainSync for ImportingChainSync {
    async fn handle(&self, peer_id: &str, packet: Packet) -> Result<(), QLightError> {
        match packet {
            Packet::NewBlock(p) => {
                let parent = p.block.parent_hash();
                if self.chain.block_by_hash(&parent).is_none() {
                    warn!(peer = %peer_id, number = p.block.number(), "[qlight] Skipping block with unknown parent");
                    return Ok(());
                }
                let hash = p.block.hash();
                if let Err(e) = self
                    .cache
                    .validate_private_state_root(&hash, &p.block.header.state_root)
                {
                    warn!(peer = %peer_id, number = p.block.number(), error = %e, "[qlight] Rejecting block");
                    return Ok(());
                }
                info!(
                    peer = %peer_id,
                    number = p.block.number(),
                    txs = p.block.transactions.len(),
                    "[qlight] Imported block"
                );
                self.chain.insert_block(p.block);
            }
            other => {
                debug!(peer = %peer_id, code = other.code(), "[qlight] Chain sync ignoring packet");
            }
        }
        Ok(())
    }
}

/// Server and client handlers plus the collaborators behind them.
pub struct LoopbackNode {
    config: QLightConfig,
    server_chain: Arc<MemoryChain>,
    client_chain: Arc<MemoryChain>,
    pool: Arc<MemoryTxPool>,
    ptm: Arc<MemoryPrivateTxManager>,
    server: Arc<QLightServerHandler>,
    client: Arc<QLightClientHandler>,
    nonce: Mutex<u64>,
    sessions: Mutex<Vec<JoinHandle<()>>>,
}

fn genesis() -> Block {
    Block::new(
        Header {
            difficulty: U256::one(),
            gas_limit: GAS_LIMIT,
            ..Default::default()
        },
        vec![],
        vec![],
    )
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl LoopbackNode {
    pub fn new(config: QLightConfig) -> Self {
        let genesis = genesis();
        let server_chain = Arc::new(MemoryChain::new(genesis.clone()));
        let client_chain = Arc::new(MemoryChain::new(genesis));
        let pool = Arc::new(MemoryTxPool::default());

        let psi = if config.client.psi.is_empty() {
            DEFAULT_PSI.to_string()
        } else {
            config.client.psi.clone()
        };
        let psm = Arc::new(MemoryPrivateStateManager::default());
        psm.add_scope(PrivateStateMetadata::new(
            psi.clone(),
            vec![LOOPBACK_PARTY.to_string()],
        ));
        let ptm = Arc::new(MemoryPrivateTxManager::default());
        let resolver = Arc::new(PrivateBlockDataResolver::new(psm.clone(), ptm.clone()));
        let auth = Arc::new(DefaultAuthProvider::new(psm, None));

        let server = Arc::new(QLightServerHandler::new(
            config.clone(),
            server_chain.clone(),
            pool.clone(),
            resolver,
            auth,
        ));

        let cache = Arc::new(PrivateClientCache::new(
            Arc::new(MemoryPrivateStateRoots::default()),
            None,
        ));
        let token_holder = Arc::new(TokenHolder::new(
            psi,
            config.client.token.clone(),
            config.client.refresh_anticipation_ms,
            None,
        ));
        let client = Arc::new(QLightClientHandler::new(
            config.clone(),
            client_chain.clone(),
            Arc::new(ImportingChainSync::new(client_chain.clone(), cache.clone())),
            cache,
            token_holder,
        ));

        Self {
            config,
            server_chain,
            client_chain,
            pool,
            ptm,
            server,
            client,
            nonce: Mutex::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn server(&self) -> &Arc<QLightServerHandler> {
        &self.server
    }

    pub fn client(&self) -> &Arc<QLightClientHandler> {
        &self.client
    }

    pub fn client_chain(&self) -> &Arc<MemoryChain> {
        &self.client_chain
    }

    pub fn server_chain(&self) -> &Arc<MemoryChain> {
        &self.server_chain
    }

    /// Starts both handlers and connects the client to the server.
    pub fn start(&self) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if !sessions.is_empty() {
            bail!("loopback node already started");
        }

        self.server.start(self.config.max_peers);
        self.client.start();

        let (server_end, client_end) = MemoryTransport::pipe();
        let limits = PeerLimits::from(&self.config);
        let version = self.config.protocol_version;
        let client_conn = Arc::new(Peer::new(
            "loopback-client",
            version,
            Arc::new(server_end),
            false,
            limits,
        ));
        let server_conn = Arc::new(Peer::new(
            "loopback-server",
            version,
            Arc::new(client_end),
            false,
            limits,
        ));

        let server = self.server.clone();
        sessions.push(tokio::spawn(async move {
            if let Err(e) = server.run_peer(client_conn).await {
                debug!(error = %e, "[qlight] Loopback server session ended");
            }
        }));
        let client = self.client.clone();
        sessions.push(tokio::spawn(async move {
            if let Err(e) = client.run_peer(server_conn).await {
                debug!(error = %e, "[qlight] Loopback client session ended");
            }
        }));

        info!(network = self.config.network_id, "[qlight] Loopback node started");
        Ok(())
    }

    /// Pools one public transaction and seals a block on the server chain
    /// carrying it and one private transaction of the loopback scope.
    pub fn produce_block(&self) -> Block {
        let nonce = {
            let mut nonce = self.nonce.lock();
            *nonce += 1;
            *nonce
        };

        let public = Transaction::new_public(nonce, None, U256::one(), vec![]);
        self.pool.add(vec![public.clone()]);

        let payload_hash = EncryptedPayloadHash::from_slice(&nonce.to_be_bytes());
        self.ptm.store(
            payload_hash,
            format!("payload-{}", nonce).into_bytes(),
            ExtraMetadata {
                sender: LOOPBACK_PARTY.to_string(),
                managed_parties: vec![LOOPBACK_PARTY.to_string()],
                ..Default::default()
            },
        );
        let private = Transaction::new_private(nonce, None, payload_hash);

        let parent = self.server_chain.head_block();
        let block = Block::new(
            Header {
                parent_hash: parent.hash(),
                number: parent.number() + 1,
                difficulty: U256::one(),
                gas_limit: GAS_LIMIT,
                time: unix_time(),
                ..Default::default()
            },
            vec![public, private],
            vec![],
        );
        debug!(number = block.number(), "[qlight] Sealed loopback block");
        self.server_chain.insert_block(block.clone());
        block
    }

    /// Stops the client, then the server, then waits for both sessions.
    pub async fn stop(&self) {
        self.client.stop().await;
        self.server.stop().await;
        let sessions = std::mem::take(&mut *self.sessions.lock());
        for handle in sessions {
            let _ = handle.await;
        }
        info!("[qlight] Loopback node stopped");
    }
}
