//! Error types and disconnect reasons for the qlight protocol.

use shared_types::{short_hex, ChainError, Hash};
use std::fmt;
use thiserror::Error;

use crate::domain::Role;

/// Reason attached to a torn-down connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Local side asked for the disconnect.
    Requested,
    /// Remote violated the protocol.
    ProtocolError,
    /// Remote is on another chain or has the wrong role.
    UselessPeer,
    /// Peer slots exhausted.
    TooManyPeers,
    /// Handshake did not complete in time.
    ReadTimeout,
    /// Token or privacy-scope authorization failed.
    AuthError,
    /// Node is shutting down.
    Quitting,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::Requested => "disconnect requested",
            DisconnectReason::ProtocolError => "breach of protocol",
            DisconnectReason::UselessPeer => "useless peer",
            DisconnectReason::TooManyPeers => "too many peers",
            DisconnectReason::ReadTimeout => "read timeout",
            DisconnectReason::AuthError => "authorization error",
            DisconnectReason::Quitting => "client quitting",
        };
        f.write_str(s)
    }
}

/// QLight protocol errors.
#[derive(Debug, Error)]
pub enum QLightError {
    #[error("Invalid message code: {0:#04x}")]
    InvalidMessageCode(u64),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u32, max: u32 },

    #[error("Invalid message: {0}")]
    Decode(String),

    #[error("No status message: got code {code:#04x} (expected {expected:#04x})")]
    NoStatusMsg { code: u64, expected: u64 },

    #[error("Extra status message")]
    ExtraStatusMsg,

    #[error("Network ID mismatch: {remote} (!= {local})")]
    NetworkIdMismatch { local: u64, remote: u64 },

    #[error("Genesis block mismatch: {} (!= {})", short_hex(.remote), short_hex(.local))]
    GenesisMismatch { local: Hash, remote: Hash },

    #[error("Protocol version mismatch: {remote} (!= {local})")]
    ProtocolVersionMismatch { local: u32, remote: u32 },

    #[error("Fork ID rejected: hash {hash:#010x}, next {next}")]
    ForkIdRejected { hash: u32, next: u64 },

    #[error("Handshake read timeout")]
    ReadTimeout,

    #[error("Role mismatch: {local} connected to a {remote} peer")]
    RoleMismatch { local: Role, remote: Role },

    #[error("Too many peers")]
    TooManyPeers,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Peer already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Peer not registered: {0}")]
    NotRegistered(String),

    #[error("Peer set closed")]
    Closed,

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Too large block TD: bitlen {bits} (max: {max})")]
    TdTooLarge { bits: usize, max: usize },

    #[error("Unable to produce block private transaction data: {0}")]
    PrivateDataResolution(String),

    #[error(
        "Private state root mismatch for block {}: cached {}, local {}",
        short_hex(.block_hash), short_hex(.cached), short_hex(.local)
    )]
    PrivateStateRootMismatch {
        block_hash: Hash,
        cached: Hash,
        local: Hash,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Peer disconnected: {0}")]
    Disconnected(DisconnectReason),

    #[error("Token error: {0}")]
    Token(String),

    #[error("Chain sync error: {0}")]
    Sync(String),
}

impl QLightError {
    /// Disconnect reason reported to the transport when this error tears a peer down.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            QLightError::Disconnected(reason) => *reason,
            QLightError::ReadTimeout => DisconnectReason::ReadTimeout,
            QLightError::TooManyPeers => DisconnectReason::TooManyPeers,
            QLightError::Unauthorized(_) => DisconnectReason::AuthError,
            QLightError::Closed => DisconnectReason::Quitting,
            QLightError::RoleMismatch { .. }
            | QLightError::NetworkIdMismatch { .. }
            | QLightError::GenesisMismatch { .. }
            | QLightError::ProtocolVersionMismatch { .. }
            | QLightError::ForkIdRejected { .. }
            | QLightError::AlreadyRegistered(_) => DisconnectReason::UselessPeer,
            _ => DisconnectReason::ProtocolError,
        }
    }
}

impl From<ChainError> for QLightError {
    fn from(err: ChainError) -> Self {
        QLightError::InvalidBlock(err.to_string())
    }
}
