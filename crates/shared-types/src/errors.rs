//! # Error Types
//!
//! Structural errors raised by the chain entities themselves.

use thiserror::Error;

/// Header/block sanity violations (field ranges a well-formed chain never exceeds).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Difficulty wider than the allowed number of bits.
    #[error("Too large block difficulty: bitlen {bits} (max: {max})")]
    DifficultyTooLarge { bits: usize, max: usize },

    /// Extra-data field above the allowed size.
    #[error("Too large block extradata: size {size} (max: {max})")]
    ExtraDataTooLarge { size: usize, max: usize },

    /// Gas used exceeds the header's own gas limit.
    #[error("Invalid gas used: {used} > limit {limit}")]
    GasUsedAboveLimit { used: u64, limit: u64 },
}
