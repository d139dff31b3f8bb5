//! # Adapters
//!
//! In-process implementations of the ports: a duplex message pipe and
//! map-backed collaborators. Production nodes plug their own.

pub mod memory;
pub mod memory_transport;

pub use memory::*;
pub use memory_transport::MemoryTransport;
