//! QLight handler configuration.
//!
//! ```toml
//! network_id = 1337
//! handshake_timeout_ms = 5000
//! max_peers = 25
//! tolerate_invalid_block_roots = true
//!
//! [client]
//! psi = "private"
//! token = "bearer ..."
//! refresh_anticipation_ms = 30000
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{MAX_KNOWN_BLOCKS, MAX_KNOWN_TXS, MAX_MESSAGE_SIZE, MAX_TD_BITS, QLIGHT65};

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Handler and peer limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QLightConfig {
    /// Network the node belongs to.
    pub network_id: u64,
    /// Protocol version announced in both handshakes.
    pub protocol_version: u32,
    /// Deadline for each handshake round (send and receive).
    pub handshake_timeout_ms: u64,
    /// Hard cap on one inbound message.
    pub max_message_size: u32,
    /// Soft byte budget for a batched response.
    pub soft_response_limit: usize,
    /// Maximum bodies returned by one `GetBlockBodies` answer.
    pub max_bodies_serve: usize,
    /// Maximum headers returned by one `GetBlockHeaders` answer.
    pub max_headers_serve: u64,
    /// Per-peer remembered block hashes.
    pub max_known_blocks: usize,
    /// Per-peer remembered transaction hashes.
    pub max_known_txs: usize,
    /// Per-peer pending block propagations.
    pub max_queued_blocks: usize,
    /// Per-peer pending transaction batches.
    pub max_queued_tx_batches: usize,
    /// Interval of the server-side token re-validation.
    pub auth_check_interval_secs: u64,
    /// Peer slots of a server (clients always use one).
    pub max_peers: usize,
    /// Drop, rather than fail on, blocks whose roots do not match their contents.
    pub tolerate_invalid_block_roots: bool,
    /// Widest total difficulty accepted from a peer.
    pub max_td_bits: usize,
    /// Client-only settings.
    pub client: ClientConfig,
}

/// Settings of a qlight client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Privacy scope the client connects for.
    pub psi: String,
    /// Initial bearer token.
    pub token: String,
    /// Refresh the token this long before it expires.
    pub refresh_anticipation_ms: i64,
}

impl Default for QLightConfig {
    fn default() -> Self {
        Self {
            network_id: 1337,
            protocol_version: QLIGHT65,
            handshake_timeout_ms: 5_000,
            max_message_size: MAX_MESSAGE_SIZE,
            soft_response_limit: 2 * 1024 * 1024,
            max_bodies_serve: 1024,
            max_headers_serve: 1024,
            max_known_blocks: MAX_KNOWN_BLOCKS,
            max_known_txs: MAX_KNOWN_TXS,
            max_queued_blocks: 4,
            max_queued_tx_batches: 4,
            auth_check_interval_secs: 30,
            max_peers: 25,
            tolerate_invalid_block_roots: true,
            max_td_bits: MAX_TD_BITS,
            client: ClientConfig::default(),
        }
    }
}

impl QLightConfig {
    /// Small limits and short timeouts for tests.
    pub fn for_testing() -> Self {
        Self {
            handshake_timeout_ms: 500,
            max_known_blocks: 16,
            max_known_txs: 64,
            auth_check_interval_secs: 1,
            max_peers: 4,
            ..Default::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "auth_check_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Never shorter than one second, even for configs built in code.
    pub fn auth_check_interval(&self) -> Duration {
        Duration::from_secs(self.auth_check_interval_secs.max(1))
    }

    /// Lookups allowed while answering one `GetBlockBodies`.
    pub fn max_body_lookups(&self) -> usize {
        2 * self.max_bodies_serve
    }
}
