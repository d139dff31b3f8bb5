//! # Handshake Rules
//!
//! Acceptance rules for the two handshake rounds. The async exchange that
//! drives them lives in `peer::handshake`; everything here is pure.
//!
//! ## Filters (applied in order)
//!
//! ```text
//! Base status:   code ── size ── decode ── network ── version ── genesis ── fork id
//! QLight status: code ── size ── decode ── PSI present (clients) ── role
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::messages::{Msg, QLightStatusPacket, StatusPacket};
use crate::events::QLightError;

/// Which side of the qlight split a node plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Light node relying on one trusted server.
    Client,
    /// Full node serving chain data and private payloads.
    Server,
}

impl Role {
    pub fn from_server_flag(server: bool) -> Self {
        if server {
            Role::Server
        } else {
            Role::Client
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Checks the frame of a handshake message before decoding it.
pub fn expect_handshake_msg(msg: &Msg, expected: u64, max_size: u32) -> Result<(), QLightError> {
    if msg.code != expected {
        return Err(QLightError::NoStatusMsg {
            code: msg.code,
            expected,
        });
    }
    msg.check_size(max_size)
}

/// Validates a remote base status against ours.
pub fn verify_status(
    local: &StatusPacket,
    remote: &StatusPacket,
    local_head_number: u64,
) -> Result<(), QLightError> {
    // Filter 1: same network
    if remote.network_id != local.network_id {
        return Err(QLightError::NetworkIdMismatch {
            local: local.network_id,
            remote: remote.network_id,
        });
    }

    // Filter 2: same protocol version
    if remote.protocol_version != local.protocol_version {
        return Err(QLightError::ProtocolVersionMismatch {
            local: local.protocol_version,
            remote: remote.protocol_version,
        });
    }

    // Filter 3: same genesis
    if remote.genesis != local.genesis {
        return Err(QLightError::GenesisMismatch {
            local: local.genesis,
            remote: remote.genesis,
        });
    }

    // Filter 4: compatible fork history
    if !local
        .fork_id
        .is_compatible(&remote.fork_id, local_head_number)
    {
        return Err(QLightError::ForkIdRejected {
            hash: remote.fork_id.hash,
            next: remote.fork_id.next,
        });
    }

    Ok(())
}

/// Validates a decoded qlight status in isolation.
///
/// A client must always name the privacy scope it connects for.
pub fn verify_qlight_status(remote: &QLightStatusPacket) -> Result<(), QLightError> {
    if !remote.server && remote.psi.is_empty() {
        return Err(QLightError::Decode(
            "client connected without specifying PSI".into(),
        ));
    }
    Ok(())
}

/// Applies the role pairing rule: clients only talk to servers, servers only
/// to clients.
pub fn check_remote_role(local: Role, remote: &QLightStatusPacket) -> Result<(), QLightError> {
    let remote_role = Role::from_server_flag(remote.server);
    let accepted = match local {
        Role::Client => remote_role == Role::Server,
        Role::Server => remote_role == Role::Client,
    };
    if !accepted {
        return Err(QLightError::RoleMismatch {
            local,
            remote: remote_role,
        });
    }
    Ok(())
}
