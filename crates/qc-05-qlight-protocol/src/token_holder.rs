//! # Token Holder
//!
//! Client-side owner of the bearer token presented to the qlight server.
//!
//! The token is refreshed through a [`TokenRefresher`] whenever it is read
//! within the refresh-anticipation window of its JWT `exp`, and by a
//! background loop that wakes ahead of expiry. A changed token is pushed to
//! every running server connection with `TokenUpdate`.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::domain::{refresh_delay_ms, token_expiration_delay_ms, token_expired};
use crate::events::QLightError;
use crate::ports::{RunningPeerAuthUpdater, TokenRefresher};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub struct TokenHolder {
    psi: String,
    token: Mutex<String>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    refresh_anticipation_ms: i64,
    peer_updater: RwLock<Option<Arc<dyn RunningPeerAuthUpdater>>>,
    /// Serialises refreshes so concurrent readers trigger one refresh.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl TokenHolder {
    /// `refresh_anticipation_ms` is used only when the refresher does not
    /// report its own window (reports `0`).
    pub fn new(
        psi: impl Into<String>,
        token: impl Into<String>,
        refresh_anticipation_ms: i64,
        refresher: Option<Arc<dyn TokenRefresher>>,
    ) -> Self {
        let refresh_anticipation_ms = match &refresher {
            Some(r) if r.refresh_anticipation_ms() > 0 => r.refresh_anticipation_ms(),
            _ => refresh_anticipation_ms,
        };
        Self {
            psi: psi.into(),
            token: Mutex::new(token.into()),
            refresher,
            refresh_anticipation_ms,
            peer_updater: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn set_peer_updater(&self, updater: Arc<dyn RunningPeerAuthUpdater>) {
        *self.peer_updater.write() = Some(updater);
    }

    pub fn psi(&self) -> &str {
        &self.psi
    }

    /// The stored token, without any refresh.
    pub fn token(&self) -> String {
        self.token.lock().clone()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.lock() = token.into();
    }

    fn is_expired(&self, token: &str) -> bool {
        match token_expiration_delay_ms(token, now_ms()) {
            Ok(expires_in) => token_expired(expires_in, self.refresh_anticipation_ms),
            Err(e) => {
                warn!(error = %e, "[qlight] Unable to check token expiry");
                true
            }
        }
    }

    /// The token to present, refreshed first if it is about to expire.
    pub async fn current_token(&self) -> String {
        let Some(refresher) = &self.refresher else {
            warn!("[qlight] No token refresher configured, token cannot be updated");
            return self.token();
        };
        if !self.is_expired(&self.token()) {
            return self.token();
        }

        let _guard = self.refresh_lock.lock().await;
        let current = self.token();
        if !self.is_expired(&current) {
            return current;
        }
        let refreshed = match refresher.refresh_token(&current, &self.psi) {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "[qlight] Token refresh failed");
                return current;
            }
        };
        if refreshed != current {
            debug!("[qlight] Obtained new token");
            let updater = self.peer_updater.read().clone();
            if let Some(updater) = updater {
                if let Err(e) = updater.update_token_for_running_peers(&refreshed).await {
                    warn!(error = %e, "[qlight] Failed to push token to running peers");
                }
            }
        }
        self.set_token(refreshed.clone());
        refreshed
    }

    /// Time until the background loop should refresh the stored token.
    pub fn next_refresh_delay(&self) -> Result<Duration, QLightError> {
        let expires_in = token_expiration_delay_ms(&self.token(), now_ms())?;
        Ok(Duration::from_millis(refresh_delay_ms(
            expires_in,
            self.refresh_anticipation_ms,
        )))
    }

    /// Refreshes the token ahead of expiry until `shutdown` flips to `true`.
    ///
    /// Returns immediately when no refresher is configured.
    pub async fn run_refresh_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.refresher.is_none() {
            return;
        }
        loop {
            let delay = match self.next_refresh_delay() {
                Ok(delay) => delay,
                Err(e) => {
                    warn!(error = %e, "[qlight] Unable to schedule token refresh");
                    Duration::from_millis(crate::domain::EXPIRED_TOKEN_RETRY_MS)
                }
            };
            debug!(delay_ms = delay.as_millis() as u64, "[qlight] Next token refresh scheduled");
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|quit| *quit) => return,
                _ = tokio::time::sleep(delay) => {}
            }
            self.current_token().await;
        }
    }
}
