//! # Peer Set
//!
//! Authoritative registry of connected qlight peers. Owns every [`Peer`];
//! other components reach a peer by id lookup.
//!
//! One `RwLock` guards the map: queries take the read lock, registration,
//! removal and closing take the write lock. Closing is terminal.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::Hash;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::Role;
use crate::events::{DisconnectReason, QLightError};
use crate::peer::{spawn_send_loops, Peer};
use crate::ports::RunningPeerAuthUpdater;

/// Whether registered peers get per-peer send loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastMode {
    /// Servers push blocks and transactions to their clients.
    Enabled,
    /// Clients never broadcast.
    Disabled,
}

struct PeerSetInner {
    peers: HashMap<String, Arc<Peer>>,
    closed: bool,
}

pub struct PeerSet {
    inner: RwLock<PeerSetInner>,
    mode: BroadcastMode,
}

impl PeerSet {
    pub fn new(mode: BroadcastMode) -> Self {
        Self {
            inner: RwLock::new(PeerSetInner {
                peers: HashMap::new(),
                closed: false,
            }),
            mode,
        }
    }

    /// Adds a peer, starting its send loops when broadcasting is enabled.
    pub fn register(&self, peer: Arc<Peer>) -> Result<(), QLightError> {
        self.insert(peer, None)
    }

    /// Like [`PeerSet::register`], but refuses an untrusted peer once `max`
    /// peers are registered. The count is taken under the same write lock as
    /// the insertion.
    pub fn register_with_limit(
        &self,
        peer: Arc<Peer>,
        max: usize,
        trusted: bool,
    ) -> Result<(), QLightError> {
        self.insert(peer, (!trusted).then_some(max))
    }

    fn insert(&self, peer: Arc<Peer>, limit: Option<usize>) -> Result<(), QLightError> {
        {
            let mut inner = self.inner.write();
            if inner.closed {
                return Err(QLightError::Closed);
            }
            if inner.peers.contains_key(peer.id()) {
                return Err(QLightError::AlreadyRegistered(peer.id().to_string()));
            }
            if limit.is_some_and(|max| inner.peers.len() >= max) {
                return Err(QLightError::TooManyPeers);
            }
            inner.peers.insert(peer.id().to_string(), peer.clone());
        }
        if self.mode == BroadcastMode::Enabled {
            spawn_send_loops(&peer);
        }
        debug!(peer = %peer.id(), "[qlight] Peer registered");
        Ok(())
    }

    /// Removes a peer and fires its termination signal.
    pub fn unregister(&self, id: &str) -> Result<Arc<Peer>, QLightError> {
        let peer = self
            .inner
            .write()
            .peers
            .remove(id)
            .ok_or_else(|| QLightError::NotRegistered(id.to_string()))?;
        peer.close();
        debug!(peer = %id, "[qlight] Peer unregistered");
        Ok(peer)
    }

    pub fn peer(&self, id: &str) -> Option<Arc<Peer>> {
        self.inner.read().peers.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().peers.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// Peer with the highest total difficulty.
    ///
    /// Peers without a TD are skipped; ties go to the smallest peer id.
    pub fn best_peer(&self) -> Option<Arc<Peer>> {
        let inner = self.inner.read();
        let mut best: Option<(&Arc<Peer>, shared_types::U256)> = None;
        for peer in inner.peers.values() {
            let Some(td) = peer.td() else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((current, best_td)) => {
                    td > *best_td || (td == *best_td && peer.id() < current.id())
                }
            };
            if better {
                best = Some((peer, td));
            }
        }
        best.map(|(peer, _)| peer.clone())
    }

    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.filter(|_| true)
    }

    pub fn peers_without_block(&self, hash: &Hash) -> Vec<Arc<Peer>> {
        self.filter(|peer| !peer.known_block(hash))
    }

    pub fn peers_without_transaction(&self, hash: &Hash) -> Vec<Arc<Peer>> {
        self.filter(|peer| !peer.known_transaction(hash))
    }

    pub fn peers_by_role(&self, role: Role) -> Vec<Arc<Peer>> {
        self.filter(|peer| Role::from_server_flag(peer.is_server()) == role)
    }

    /// Matching peers, ordered by id.
    fn filter<F: Fn(&Peer) -> bool>(&self, pred: F) -> Vec<Arc<Peer>> {
        let mut list: Vec<Arc<Peer>> = self
            .inner
            .read()
            .peers
            .values()
            .filter(|peer| pred(peer))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.id().cmp(b.id()));
        list
    }

    /// Closes the set and disconnects every registered peer.
    pub async fn close(&self) {
        let peers: Vec<Arc<Peer>> = {
            let mut inner = self.inner.write();
            inner.closed = true;
            inner.peers.drain().map(|(_, peer)| peer).collect()
        };
        for peer in peers {
            peer.disconnect(DisconnectReason::Quitting).await;
        }
    }
}

/// Pushes a refreshed client token to every connected server.
#[async_trait]
impl RunningPeerAuthUpdater for PeerSet {
    async fn update_token_for_running_peers(&self, token: &str) -> Result<(), QLightError> {
        for peer in self.peers_by_role(Role::Server) {
            if let Err(e) = peer.send_token_update(token).await {
                warn!(peer = %peer.id(), error = %e, "[qlight] Failed to send token update");
                return Err(e);
            }
            debug!(peer = %peer.id(), "[qlight] Sent token update");
        }
        Ok(())
    }
}
