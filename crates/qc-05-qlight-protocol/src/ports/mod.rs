//! Ports for the qlight protocol.

pub mod outbound;
pub mod transport;

pub use outbound::*;
pub use transport::*;
