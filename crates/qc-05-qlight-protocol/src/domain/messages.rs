//! # Wire Messages
//!
//! Message codes, the raw frame read from the transport, and the typed
//! packets decoded from it.
//!
//! ## Code Space
//!
//! ```text
//! 0x00 ─ 0x0a   base chain protocol (status, announcements, header/body sync, tx relay)
//! 0x11 ─ 0x13   qlight extension (status, token update, block private data)
//! ```
//!
//! Payload layout is bincode over the serde structs below; the codes and
//! their semantics are what the protocol fixes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared_types::{Block, Body, ForkId, Hash, Header, Transaction, U256};

use super::private_data::BlockPrivateData;
use crate::events::QLightError;

/// Protocol version that introduced pooled transaction announcements.
pub const ETH65: u32 = 65;

/// QLight protocol version spoken by this implementation.
pub const QLIGHT65: u32 = 65;

/// Hard cap on a single inbound message (10 MiB).
pub const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

// =============================================================================
// MESSAGE CODES
// =============================================================================

pub const STATUS_MSG: u64 = 0x00;
pub const NEW_BLOCK_HASHES_MSG: u64 = 0x01;
pub const TRANSACTIONS_MSG: u64 = 0x02;
pub const GET_BLOCK_HEADERS_MSG: u64 = 0x03;
pub const BLOCK_HEADERS_MSG: u64 = 0x04;
pub const GET_BLOCK_BODIES_MSG: u64 = 0x05;
pub const BLOCK_BODIES_MSG: u64 = 0x06;
pub const NEW_BLOCK_MSG: u64 = 0x07;
pub const NEW_POOLED_TRANSACTION_HASHES_MSG: u64 = 0x08;
pub const GET_POOLED_TRANSACTIONS_MSG: u64 = 0x09;
pub const POOLED_TRANSACTIONS_MSG: u64 = 0x0a;

pub const QLIGHT_STATUS_MSG: u64 = 0x11;
pub const QLIGHT_TOKEN_UPDATE_MSG: u64 = 0x12;
pub const QLIGHT_NEW_BLOCK_PRIVATE_DATA_MSG: u64 = 0x13;

/// Human-readable name of a message code, for logs and errors.
pub fn message_name(code: u64) -> &'static str {
    match code {
        STATUS_MSG => "Status",
        NEW_BLOCK_HASHES_MSG => "NewBlockHashes",
        TRANSACTIONS_MSG => "Transactions",
        GET_BLOCK_HEADERS_MSG => "GetBlockHeaders",
        BLOCK_HEADERS_MSG => "BlockHeaders",
        GET_BLOCK_BODIES_MSG => "GetBlockBodies",
        BLOCK_BODIES_MSG => "BlockBodies",
        NEW_BLOCK_MSG => "NewBlock",
        NEW_POOLED_TRANSACTION_HASHES_MSG => "NewPooledTransactionHashes",
        GET_POOLED_TRANSACTIONS_MSG => "GetPooledTransactions",
        POOLED_TRANSACTIONS_MSG => "PooledTransactions",
        QLIGHT_STATUS_MSG => "QLightStatus",
        QLIGHT_TOKEN_UPDATE_MSG => "QLightTokenUpdate",
        QLIGHT_NEW_BLOCK_PRIVATE_DATA_MSG => "QLightNewBlockPrivateData",
        _ => "Unknown",
    }
}

// =============================================================================
// RAW FRAME
// =============================================================================

/// A framed message as handed over by the transport.
///
/// `size` is the size declared by the framing layer; it is checked against
/// the configured maximum before the payload is ever decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Msg {
    pub code: u64,
    pub size: u32,
    pub payload: Vec<u8>,
}

impl Msg {
    /// Encodes a payload under the given code.
    pub fn encode<T: Serialize>(code: u64, value: &T) -> Result<Self, QLightError> {
        let payload = bincode::serialize(value).map_err(|e| {
            QLightError::Transport(format!("encode {}: {}", message_name(code), e))
        })?;
        Ok(Self {
            code,
            size: payload.len() as u32,
            payload,
        })
    }

    /// Decodes the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QLightError> {
        bincode::deserialize(&self.payload).map_err(|e| {
            QLightError::Decode(format!("message {}: {}", message_name(self.code), e))
        })
    }

    /// Rejects messages whose declared size exceeds `max`.
    pub fn check_size(&self, max: u32) -> Result<(), QLightError> {
        if self.size > max {
            return Err(QLightError::MessageTooLarge {
                size: self.size,
                max,
            });
        }
        Ok(())
    }
}

// =============================================================================
// PACKETS
// =============================================================================

/// Base protocol handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPacket {
    pub protocol_version: u32,
    pub network_id: u64,
    pub td: U256,
    pub head: Hash,
    pub genesis: Hash,
    pub fork_id: ForkId,
}

/// QLight capability handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QLightStatusPacket {
    pub protocol_version: u32,
    pub server: bool,
    pub psi: String,
    pub token: String,
}

/// Client-to-server token refresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUpdatePacket {
    pub token: String,
}

/// Entry of a `NewBlockHashes` announcement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAnnouncement {
    pub hash: Hash,
    pub number: u64,
}

/// Origin of a header query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashOrNumber {
    Hash(Hash),
    Number(u64),
}

/// Header range query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlockHeadersPacket {
    pub origin: HashOrNumber,
    pub amount: u64,
    pub skip: u64,
    pub reverse: bool,
}

/// Full block propagation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBlockPacket {
    pub block: Block,
    pub td: U256,
}

/// A decoded inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Status(StatusPacket),
    NewBlockHashes(Vec<BlockAnnouncement>),
    Transactions(Vec<Transaction>),
    GetBlockHeaders(GetBlockHeadersPacket),
    BlockHeaders(Vec<Header>),
    GetBlockBodies(Vec<Hash>),
    BlockBodies(Vec<Body>),
    NewBlock(NewBlockPacket),
    NewPooledTransactionHashes(Vec<Hash>),
    GetPooledTransactions(Vec<Hash>),
    PooledTransactions(Vec<Transaction>),
    QLightStatus(QLightStatusPacket),
    TokenUpdate(TokenUpdatePacket),
    BlockPrivateData(Vec<BlockPrivateData>),
}

impl Packet {
    /// Decodes a message by code.
    pub fn decode(msg: &Msg) -> Result<Self, QLightError> {
        let packet = match msg.code {
            STATUS_MSG => Packet::Status(msg.decode()?),
            NEW_BLOCK_HASHES_MSG => Packet::NewBlockHashes(msg.decode()?),
            TRANSACTIONS_MSG => Packet::Transactions(msg.decode()?),
            GET_BLOCK_HEADERS_MSG => Packet::GetBlockHeaders(msg.decode()?),
            BLOCK_HEADERS_MSG => Packet::BlockHeaders(msg.decode()?),
            GET_BLOCK_BODIES_MSG => Packet::GetBlockBodies(msg.decode()?),
            BLOCK_BODIES_MSG => Packet::BlockBodies(msg.decode()?),
            NEW_BLOCK_MSG => Packet::NewBlock(msg.decode()?),
            NEW_POOLED_TRANSACTION_HASHES_MSG => Packet::NewPooledTransactionHashes(msg.decode()?),
            GET_POOLED_TRANSACTIONS_MSG => Packet::GetPooledTransactions(msg.decode()?),
            POOLED_TRANSACTIONS_MSG => Packet::PooledTransactions(msg.decode()?),
            QLIGHT_STATUS_MSG => Packet::QLightStatus(msg.decode()?),
            QLIGHT_TOKEN_UPDATE_MSG => Packet::TokenUpdate(msg.decode()?),
            QLIGHT_NEW_BLOCK_PRIVATE_DATA_MSG => Packet::BlockPrivateData(msg.decode()?),
            code => return Err(QLightError::InvalidMessageCode(code)),
        };
        Ok(packet)
    }

    /// The message code this packet travels under.
    pub fn code(&self) -> u64 {
        match self {
            Packet::Status(_) => STATUS_MSG,
            Packet::NewBlockHashes(_) => NEW_BLOCK_HASHES_MSG,
            Packet::Transactions(_) => TRANSACTIONS_MSG,
            Packet::GetBlockHeaders(_) => GET_BLOCK_HEADERS_MSG,
            Packet::BlockHeaders(_) => BLOCK_HEADERS_MSG,
            Packet::GetBlockBodies(_) => GET_BLOCK_BODIES_MSG,
            Packet::BlockBodies(_) => BLOCK_BODIES_MSG,
            Packet::NewBlock(_) => NEW_BLOCK_MSG,
            Packet::NewPooledTransactionHashes(_) => NEW_POOLED_TRANSACTION_HASHES_MSG,
            Packet::GetPooledTransactions(_) => GET_POOLED_TRANSACTIONS_MSG,
            Packet::PooledTransactions(_) => POOLED_TRANSACTIONS_MSG,
            Packet::QLightStatus(_) => QLIGHT_STATUS_MSG,
            Packet::TokenUpdate(_) => QLIGHT_TOKEN_UPDATE_MSG,
            Packet::BlockPrivateData(_) => QLIGHT_NEW_BLOCK_PRIVATE_DATA_MSG,
        }
    }

    /// Encodes the packet into a frame.
    pub fn encode(&self) -> Result<Msg, QLightError> {
        let code = self.code();
        match self {
            Packet::Status(p) => Msg::encode(code, p),
            Packet::NewBlockHashes(p) => Msg::encode(code, p),
            Packet::Transactions(p) | Packet::PooledTransactions(p) => Msg::encode(code, p),
            Packet::GetBlockHeaders(p) => Msg::encode(code, p),
            Packet::BlockHeaders(p) => Msg::encode(code, p),
            Packet::GetBlockBodies(p)
            | Packet::NewPooledTransactionHashes(p)
            | Packet::GetPooledTransactions(p) => Msg::encode(code, p),
            Packet::BlockBodies(p) => Msg::encode(code, p),
            Packet::NewBlock(p) => Msg::encode(code, p),
            Packet::QLightStatus(p) => Msg::encode(code, p),
            Packet::TokenUpdate(p) => Msg::encode(code, p),
            Packet::BlockPrivateData(p) => Msg::encode(code, p),
        }
    }
}
