//! # Shared Types Crate
//!
//! Chain entities consumed by the qlight peer-to-peer layer.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: blocks, headers and transactions are defined
//!   once here and reused by every crate in the workspace.
//! - **Content Addressing**: every entity knows how to compute its own hash,
//!   so peers can de-duplicate without a codec round-trip.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
