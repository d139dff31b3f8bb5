//! # Domain Layer for the QLight Protocol
//!
//! Pure protocol logic with no I/O. This is the innermost layer of the
//! hexagonal architecture.
//!
//! ## Contents
//!
//! - **known_set**: Bounded de-duplication sets (`KnownSet`)
//! - **messages**: Message codes, wire frame (`Msg`) and packets (`Packet`)
//! - **handshake**: Status packets, `Role` and the handshake acceptance rules
//! - **block_validation**: Structural checks on announced blocks
//! - **private_data**: Private payload batches and privacy-scope filtering
//! - **token**: JWT expiry arithmetic for the client token holder
//!
//! ## Design Principles
//!
//! 1. **No I/O**: All functions are pure and synchronous
//! 2. **Testable**: All logic can be unit tested without mocks

mod block_validation;
mod handshake;
mod known_set;
mod messages;
mod private_data;
mod token;

pub use block_validation::*;
pub use handshake::*;
pub use known_set::*;
pub use messages::*;
pub use private_data::*;
pub use token::*;
