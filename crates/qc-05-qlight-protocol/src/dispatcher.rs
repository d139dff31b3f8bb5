//! # Message Dispatcher
//!
//! Per-role routing of inbound messages. Servers and clients use disjoint
//! routing tables, built once when the handler is constructed.
//!
//! ## Read loop
//!
//! ```text
//! read ── size check ── route by code ── decode ── handler
//!   │                        │               │
//!   │                 InvalidMessageCode  Decode
//!   └── termination signal ── Disconnected(reason)
//! ```
//!
//! Any error ends the loop and is returned to the run-peer wrapper, which
//! tears the connection down.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use crate::domain::*;
use crate::events::{DisconnectReason, QLightError};
use crate::peer::Peer;

/// What a server does with an inbound code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerRoute {
    ServeHeaders,
    ServeBodies,
    ServePooledTransactions,
    TokenUpdate,
    /// Response or broadcast traffic meaningful only to clients.
    Ignore,
    ExtraStatus,
}

/// What a client does with an inbound code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientRoute {
    /// Hand to the chain-sync collaborator untouched.
    Downstream,
    Bodies,
    Transactions,
    NewBlock,
    PrivateData,
    ExtraStatus,
}

/// Code-to-route table of one role.
#[derive(Clone, Debug)]
pub struct RoutingTable<R> {
    routes: HashMap<u64, R>,
}

impl<R: Copy> RoutingTable<R> {
    pub fn new(routes: impl IntoIterator<Item = (u64, R)>) -> Self {
        Self {
            routes: routes.into_iter().collect(),
        }
    }

    pub fn route(&self, code: u64) -> Result<R, QLightError> {
        self.routes
            .get(&code)
            .copied()
            .ok_or(QLightError::InvalidMessageCode(code))
    }
}

impl RoutingTable<ServerRoute> {
    pub fn server() -> Self {
        Self::new([
            (STATUS_MSG, ServerRoute::ExtraStatus),
            (QLIGHT_STATUS_MSG, ServerRoute::ExtraStatus),
            (GET_BLOCK_HEADERS_MSG, ServerRoute::ServeHeaders),
            (GET_BLOCK_BODIES_MSG, ServerRoute::ServeBodies),
            (GET_POOLED_TRANSACTIONS_MSG, ServerRoute::ServePooledTransactions),
            (QLIGHT_TOKEN_UPDATE_MSG, ServerRoute::TokenUpdate),
            (NEW_BLOCK_HASHES_MSG, ServerRoute::Ignore),
            (TRANSACTIONS_MSG, ServerRoute::Ignore),
            (BLOCK_HEADERS_MSG, ServerRoute::Ignore),
            (BLOCK_BODIES_MSG, ServerRoute::Ignore),
            (NEW_BLOCK_MSG, ServerRoute::Ignore),
            (NEW_POOLED_TRANSACTION_HASHES_MSG, ServerRoute::Ignore),
            (POOLED_TRANSACTIONS_MSG, ServerRoute::Ignore),
        ])
    }
}

impl RoutingTable<ClientRoute> {
    pub fn client() -> Self {
        Self::new([
            (STATUS_MSG, ClientRoute::ExtraStatus),
            (QLIGHT_STATUS_MSG, ClientRoute::ExtraStatus),
            (BLOCK_HEADERS_MSG, ClientRoute::Downstream),
            (NEW_BLOCK_HASHES_MSG, ClientRoute::Downstream),
            (NEW_POOLED_TRANSACTION_HASHES_MSG, ClientRoute::Downstream),
            (POOLED_TRANSACTIONS_MSG, ClientRoute::Downstream),
            (BLOCK_BODIES_MSG, ClientRoute::Bodies),
            (TRANSACTIONS_MSG, ClientRoute::Transactions),
            (NEW_BLOCK_MSG, ClientRoute::NewBlock),
            (QLIGHT_NEW_BLOCK_PRIVATE_DATA_MSG, ClientRoute::PrivateData),
        ])
    }
}

/// Consumer of the messages read from one peer.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_msg(&self, peer: &Arc<Peer>, msg: Msg) -> Result<(), QLightError>;
}

/// Reads and dispatches messages until an error or the peer closes.
///
/// Always returns the error that ended the loop.
pub async fn run_message_loop<H>(handler: &H, peer: &Arc<Peer>, max_message_size: u32) -> QLightError
where
    H: MessageHandler + ?Sized,
{
    let term = peer.term_signal();
    loop {
        let read = tokio::select! {
            biased;
            _ = term.wait() => {
                let reason = peer.disconnect_reason().unwrap_or(DisconnectReason::Requested);
                return QLightError::Disconnected(reason);
            }
            read = peer.read_msg() => read,
        };
        let msg = match read {
            Ok(msg) => msg,
            Err(e) => return e,
        };
        if let Err(e) = msg.check_size(max_message_size) {
            return e;
        }
        trace!(peer = %peer.id(), code = msg.code, name = message_name(msg.code), "[qlight] Handling message");
        if let Err(e) = handler.handle_msg(peer, msg).await {
            return e;
        }
    }
}
