//! Structural validation of `NewBlock` announcements.

use shared_types::{calc_tx_root, calc_uncle_hash};

use super::messages::NewBlockPacket;
use crate::events::QLightError;

/// Widest total difficulty accepted from a peer.
pub const MAX_TD_BITS: usize = 100;

/// Outcome of validating an announced block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockVerdict {
    /// Block is consistent; process it.
    Accept,
    /// Roots do not match the contents, but mismatches are tolerated:
    /// drop the announcement and keep the connection.
    Ignore(RootMismatch),
}

/// Which derived root did not match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootMismatch {
    UncleHash,
    TxRoot,
}

impl RootMismatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootMismatch::UncleHash => "uncle hash mismatch",
            RootMismatch::TxRoot => "transaction root mismatch",
        }
    }
}

/// Validates a propagated block.
///
/// Root mismatches are returned as [`BlockVerdict::Ignore`] when
/// `tolerate_root_mismatch` is set and as `InvalidBlock` otherwise. Sanity and
/// TD-width violations always fail.
pub fn validate_new_block(
    packet: &NewBlockPacket,
    tolerate_root_mismatch: bool,
    max_td_bits: usize,
) -> Result<BlockVerdict, QLightError> {
    let block = &packet.block;

    let mismatch = if calc_uncle_hash(&block.uncles) != block.header.uncle_hash {
        Some(RootMismatch::UncleHash)
    } else if calc_tx_root(&block.transactions) != block.header.tx_root {
        Some(RootMismatch::TxRoot)
    } else {
        None
    };
    if let Some(mismatch) = mismatch {
        if tolerate_root_mismatch {
            return Ok(BlockVerdict::Ignore(mismatch));
        }
        return Err(QLightError::InvalidBlock(mismatch.as_str().to_string()));
    }

    block.header.sanity_check()?;

    let bits = packet.td.bits();
    if bits > max_td_bits {
        return Err(QLightError::TdTooLarge {
            bits,
            max: max_td_bits,
        });
    }

    Ok(BlockVerdict::Accept)
}
