//! # QLight Protocol Subsystem (qc-05)
//!
//! Peer-to-peer handler for the qlight client/server split: a light client
//! offloads chain retrieval and private payload distribution to one trusted
//! server, which serves and pushes only the payloads of the client's privacy
//! scope.
//!
//! ## Architecture Role
//!
//! ```text
//! [Chain / TxPool] ──heads, txs──→ [QLight Server] ══ qlight ══ [QLight Client] ──packets──→ [Chain Sync]
//!                                        │                           │
//!                                   PrivateBlockData           PrivateClientCache
//!                                     Resolver (PTM/PSM)
//! ```
//!
//! ## Layers
//!
//! - **domain**: message codes, packets, handshake rules, block validation (pure)
//! - **ports**: collaborator traits and the message transport seam
//! - **adapters**: in-memory transport and collaborators
//! - **peer / peer_set / dispatcher**: per-connection runtime, registry, routing
//! - **handler**: server and client lifecycles
//!
//! ## Security
//!
//! - Clients accept only servers; servers refuse servers
//! - Server admission and periodic re-authorization via [`auth::AuthProvider`]
//! - Private payloads are filtered by privacy scope before leaving the server

pub mod adapters;
pub mod auth;
pub mod client_cache;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod events;
pub mod handler;
pub mod peer;
pub mod peer_set;
pub mod ports;
pub mod resolver;
pub mod token_holder;

pub use auth::{AuthProvider, DefaultAuthProvider};
pub use client_cache::PrivateClientCache;
pub use config::{ClientConfig, ConfigError, QLightConfig};
pub use domain::*;
pub use events::{DisconnectReason, QLightError};
pub use handler::client::QLightClientHandler;
pub use handler::server::QLightServerHandler;
pub use handler::{NodeInfo, PeerWaitGroup};
pub use peer::{Peer, PeerInfo, PeerLimits, QueueOutcome};
pub use peer_set::{BroadcastMode, PeerSet};
pub use resolver::PrivateBlockDataResolver;
pub use token_holder::TokenHolder;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
