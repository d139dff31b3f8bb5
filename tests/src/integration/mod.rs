//! Integration scenarios between qlight servers and clients.

#[cfg(test)]
pub mod harness;

pub mod qlight_client_flows;
pub mod qlight_handshake;
pub mod qlight_server_flows;
