//! Shared fixtures: in-memory server and client nodes joined by pipes.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use qc_05_qlight_protocol::adapters::{
    MemoryAuthManager, MemoryChain, MemoryPrivateStateManager, MemoryPrivateStateRoots,
    MemoryPrivateTxManager, MemoryTransport, MemoryTxPool, RecordingChainSync,
};
use qc_05_qlight_protocol::auth::{ETH_RPC_AUTHORITY, QLIGHT_P2P_AUTHORITY};
use qc_05_qlight_protocol::ports::{AuthToken, AuthenticationManager, ChainSync};
use qc_05_qlight_protocol::{
    DefaultAuthProvider, ExtraMetadata, Peer, PeerLimits, PrivateBlockDataResolver,
    PrivateClientCache, PrivateStateMetadata, QLightClientHandler, QLightConfig, QLightError,
    QLightServerHandler, TokenHolder,
};
use shared_types::{Block, EncryptedPayloadHash, Header, Transaction, U256};

pub const PSI_A: &str = "psi-a";
pub const PSI_B: &str = "psi-b";
pub const PARTY_A: &str = "party-a";
pub const PARTY_B: &str = "party-b";

const GAS_LIMIT: u64 = 1_000_000;

pub fn genesis() -> Block {
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

pub fn child(parent: &Block, difficulty: u64, txs: Vec<Transaction>) -> Block {
    Block::new(
        Header {
            parent_hash: parent.hash(),
            number: parent.number() + 1,
            difficulty: U256::from(difficulty),
            gas_limit: GAS_LIMIT,
            ..Default::default()
        },
        txs,
        vec![],
    )
}

pub fn full_grant(psi: &str) -> AuthToken {
    AuthToken {
        authorities: vec![QLIGHT_P2P_AUTHORITY.into(), ETH_RPC_AUTHORITY.into()],
        psis: vec![psi.into()],
    }
}

pub struct ServerNode {
    pub chain: Arc<MemoryChain>,
    pub pool: Arc<MemoryTxPool>,
    pub ptm: Arc<MemoryPrivateTxManager>,
    pub auth: Arc<MemoryAuthManager>,
    pub handler: Arc<QLightServerHandler>,
}

impl ServerNode {
    /// A started server without authentication.
    pub fn new(config: QLightConfig) -> Self {
        Self::build(config, MemoryAuthManager::default())
    }

    /// A started server whose tokens must be granted on `auth`.
    pub fn with_auth(config: QLightConfig) -> Self {
        Self::build(config, MemoryAuthManager::enabled())
    }

    fn build(config: QLightConfig, auth: MemoryAuthManager) -> Self {
        let max_peers = config.max_peers;
        let chain = Arc::new(MemoryChain::new(genesis()));
        let pool = Arc::new(MemoryTxPool::default());
        let psm = Arc::new(MemoryPrivateStateManager::default());
        psm.add_scope(PrivateStateMetadata::new(PSI_A, vec![PARTY_A.into()]));
        psm.add_scope(PrivateStateMetadata::new(PSI_B, vec![PARTY_B.into()]));
        let ptm = Arc::new(MemoryPrivateTxManager::default());
        let auth = Arc::new(auth);
        let manager: Arc<dyn AuthenticationManager> = auth.clone();
        let handler = Arc::new(QLightServerHandler::new(
            config,
            chain.clone(),
            pool.clone(),
            Arc::new(PrivateBlockDataResolver::new(psm.clone(), ptm.clone())),
            Arc::new(DefaultAuthProvider::new(psm, Some(manager))),
        ));
        handler.start(max_peers);
        Self {
            chain,
            pool,
            ptm,
            auth,
            handler,
        }
    }

    /// Stores a payload owned by `party` and returns the private transaction
    /// pointing at it.
    pub fn private_tx(&self, tag: &[u8], party: &str) -> Transaction {
        let hash = EncryptedPayloadHash::from_slice(tag);
        self.ptm.store(
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

    /// Extends the canonical chain by one block carrying `txs`.
    pub fn seal(&self, txs: Vec<Transaction>) -> Block {
        let block = child(&self.chain.head_block(), 2, txs);
        self.chain.insert_block(block.clone());
        block
    }
}

pub struct ClientNode {
    pub chain: Arc<MemoryChain>,
    pub sync: Arc<RecordingChainSync>,
    pub cache: Arc<PrivateClientCache>,
    pub handler: Arc<QLightClientHandler>,
}

impl ClientNode {
    pub fn new(config: QLightConfig, psi: &str, token: &str) -> Self {
        Self::with_holder(config, Arc::new(TokenHolder::new(psi, token, 0, None)))
    }

    pub fn with_holder(config: QLightConfig, holder: Arc<TokenHolder>) -> Self {
        let recorder = Arc::new(RecordingChainSync::default());
        Self::build(config, holder, recorder.clone(), recorder)
    }

    /// A client whose downstream packets go to `sync` instead of the recorder.
    pub fn with_sync(
        config: QLightConfig,
        holder: Arc<TokenHolder>,
        sync: Arc<dyn ChainSync>,
    ) -> Self {
        Self::build(config, holder, sync, Arc::new(RecordingChainSync::default()))
    }

    fn build(
        config: QLightConfig,
        holder: Arc<TokenHolder>,
        sync: Arc<dyn ChainSync>,
        recorder: Arc<RecordingChainSync>,
    ) -> Self {
        let chain = Arc::new(MemoryChain::new(genesis()));
        let cache = Arc::new(PrivateClientCache::new(
            Arc::new(MemoryPrivateStateRoots::default()),
            None,
        ));
        let handler = Arc::new(QLightClientHandler::new(
            config,
            chain.clone(),
            sync,
            cache.clone(),
            holder,
        ));
        handler.start();
        Self {
            chain,
            sync: recorder,
            cache,
            handler,
        }
    }
}

/// Two peers over one pipe, as seen from either end.
pub fn peer_pair(config: &QLightConfig, a_id: &str, b_id: &str) -> (Arc<Peer>, Arc<Peer>) {
    let (a_end, b_end) = MemoryTransport::pipe();
    let limits = PeerLimits::from(config);
    let version = config.protocol_version;
    (
        Arc::new(Peer::new(b_id, version, Arc::new(a_end), false, limits)),
        Arc::new(Peer::new(a_id, version, Arc::new(b_end), false, limits)),
    )
}

/// A running server/client connection.
pub struct Link {
    /// The client as the server sees it.
    pub client_peer: Arc<Peer>,
    /// The server as the client sees it.
    pub server_peer: Arc<Peer>,
    pub server_session: JoinHandle<Result<(), QLightError>>,
    pub client_session: JoinHandle<Result<(), QLightError>>,
}

pub fn connect(server: &ServerNode, client: &ClientNode, client_id: &str) -> Link {
    let config = QLightConfig::for_testing();
    let (client_peer, server_peer) = peer_pair(&config, "server", client_id);
    let handler = server.handler.clone();
    let peer = client_peer.clone();
    let server_session = tokio::spawn(async move { handler.run_peer(peer).await });
    let handler = client.handler.clone();
    let peer = server_peer.clone();
    let client_session = tokio::spawn(async move { handler.run_peer(peer).await });
    Link {
        client_peer,
        server_peer,
        server_session,
        client_session,
    }
}

/// Polls `cond` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {}", what);
}
