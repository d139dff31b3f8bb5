//! # Node Runtime Library
//!
//! Wiring for the qlight loopback node. The main entry point is the
//! `main.rs` binary; the wiring lives here so it can be tested.
//!
//! ## Loopback Topology
//!
//! ```text
//! [producer] ──blocks, txs──→ [server chain / pool]
//!                                     │
//!                            QLightServerHandler ══ MemoryTransport ══ QLightClientHandler
//!                                                                           │
//!                                                                  ImportingChainSync ──→ [client chain]
//! ```

pub mod loopback;

pub use loopback::{ImportingChainSync, LoopbackNode};
