//! # Protocol Handlers
//!
//! One handler per qlight role. Both drive the same connection lifecycle:
//!
//! ```text
//! base handshake ── qlight handshake ── capacity ── (auth) ── register ── message loop ── unregister
//!        │                 │                │          │          │
//!        └─────────────────┴── base_disconnected fired ┴──────────┘
//! ```
//!
//! - [`server::QLightServerHandler`] serves chain data and private payloads,
//!   broadcasts new heads and pooled transactions.
//! - [`client::QLightClientHandler`] keeps a single server connection, feeds
//!   the private client cache and forwards chain traffic to chain sync.

pub mod client;
pub mod server;

use serde::Serialize;
use shared_types::U256;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::QLightConfig;
use crate::domain::StatusPacket;
use crate::ports::ChainBackend;

/// Counts running peer sessions so shutdown can wait for them.
#[derive(Clone)]
pub struct PeerWaitGroup {
    count: Arc<watch::Sender<usize>>,
}

impl Default for PeerWaitGroup {
    fn default() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }
}

/// Held by one running session; leaving the scope releases it.
pub struct PeerWaitGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for PeerWaitGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl PeerWaitGroup {
    pub fn enter(&self) -> PeerWaitGuard {
        self.count.send_modify(|n| *n += 1);
        PeerWaitGuard {
            count: self.count.clone(),
        }
    }

    pub fn running(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolves once no session is running.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Node summary exposed to diagnostics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeInfo {
    pub network: u64,
    pub difficulty: Option<U256>,
    pub genesis: String,
    pub config: serde_json::Value,
    pub head: String,
    pub consensus: String,
}

pub fn node_info(network_id: u64, chain: &dyn ChainBackend) -> NodeInfo {
    let head = chain.current_header();
    let hash = head.hash();
    NodeInfo {
        network: network_id,
        difficulty: chain.total_difficulty(&hash, head.number),
        genesis: format!("0x{}", hex::encode(chain.genesis().hash())),
        config: chain.chain_config(),
        head: format!("0x{}", hex::encode(hash)),
        consensus: "qlight".to_string(),
    }
}

/// Our base status and the local head number used for fork-id checks.
pub(crate) fn local_status(config: &QLightConfig, chain: &dyn ChainBackend) -> (StatusPacket, u64) {
    let head = chain.current_header();
    let hash = head.hash();
    let status = StatusPacket {
        protocol_version: config.protocol_version,
        network_id: config.network_id,
        td: chain.total_difficulty(&hash, head.number).unwrap_or_default(),
        head: hash,
        genesis: chain.genesis().hash(),
        fork_id: chain.fork_id(),
    };
    (status, head.number)
}
