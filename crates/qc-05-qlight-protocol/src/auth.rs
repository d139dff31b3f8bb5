//! # Authorization Context
//!
//! Server-side admission of qlight clients. The provider is constructed
//! explicitly and injected into the server handler; nothing here reads
//! process-wide state.
//!
//! A client is admitted when its token authenticates, grants access to its
//! privacy scope and carries both the `p2p://qlight` and `rpc://eth_*`
//! authorities, and the scope resolves in the private state manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::events::{DisconnectReason, QLightError};
use crate::peer::Peer;
use crate::ports::{AuthenticationManager, PrivateStateManager};

/// Authority required to use the qlight protocol.
pub const QLIGHT_P2P_AUTHORITY: &str = "p2p://qlight";

/// Authority required to read chain data over RPC.
pub const ETH_RPC_AUTHORITY: &str = "rpc://eth_*";

/// Decides whether a client token may act for a privacy scope.
pub trait AuthProvider: Send + Sync {
    /// Reads the enablement state of the underlying security plugin.
    fn initialize(&self) -> Result<(), QLightError>;

    fn authorize(&self, token: &str, psi: &str) -> Result<(), QLightError>;
}

/// Auth provider backed by an authentication manager and the private state manager.
pub struct DefaultAuthProvider {
    psm: Arc<dyn PrivateStateManager>,
    auth_manager: Option<Arc<dyn AuthenticationManager>>,
    enabled: AtomicBool,
}

impl DefaultAuthProvider {
    pub fn new(
        psm: Arc<dyn PrivateStateManager>,
        auth_manager: Option<Arc<dyn AuthenticationManager>>,
    ) -> Self {
        Self {
            psm,
            auth_manager,
            enabled: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl AuthProvider for DefaultAuthProvider {
    fn initialize(&self) -> Result<(), QLightError> {
        let enabled = match &self.auth_manager {
            Some(manager) => manager.is_enabled()?,
            None => false,
        };
        self.enabled.store(enabled, Ordering::Release);
        info!(enabled, "[qlight] Auth provider initialized");
        Ok(())
    }

    fn authorize(&self, token: &str, psi: &str) -> Result<(), QLightError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let Some(manager) = &self.auth_manager else {
            return Ok(());
        };

        let auth = manager.authenticate(token).map_err(|e| match e {
            QLightError::Unauthorized(_) => e,
            other => QLightError::Unauthorized(other.to_string()),
        })?;
        if !auth.is_psi_authorized(psi) {
            return Err(QLightError::Unauthorized("PSI not authorized".into()));
        }
        for authority in [QLIGHT_P2P_AUTHORITY, ETH_RPC_AUTHORITY] {
            if !auth.has_authority(authority) {
                return Err(QLightError::Unauthorized(format!(
                    "missing authority {}",
                    authority
                )));
            }
        }
        self.psm
            .resolve_for_psi(psi)
            .map_err(|e| QLightError::Unauthorized(format!("unable to resolve PSI {}: {}", psi, e)))?;
        Ok(())
    }
}

const MIN_AUTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Re-validates the peer's current token every `interval` (at least one
/// second) until the peer closes. A failed check disconnects the peer with
/// [`DisconnectReason::AuthError`].
pub async fn run_periodic_auth_check(
    peer: Arc<Peer>,
    auth: Arc<dyn AuthProvider>,
    interval: Duration,
) {
    let term = peer.term_signal();
    let interval = interval.max(MIN_AUTH_CHECK_INTERVAL);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            biased;
            _ = term.wait() => return,
            _ = ticker.tick() => {}
        }
        if let Err(e) = auth.authorize(&peer.token(), &peer.psi()) {
            error!(peer = %peer.id(), error = %e, "[qlight] Periodic authorization check failed");
            peer.disconnect(DisconnectReason::AuthError).await;
            return;
        }
        debug!(peer = %peer.id(), "[qlight] Periodic authorization check passed");
    }
}
