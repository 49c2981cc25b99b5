//! Forced logout and next-launch reason tracking
//!
//! Ordering guarantee: the reason is persisted before `is_authenticated`
//! flips to false, so whatever reacts to the sign-out (typically the launch
//! screen) can already read the banner reason. Persistence failures are logged
//! and never block the logout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use paylock_core::store::{self, keys};
use paylock_core::{CredentialStore, LogoutReason};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Host hook that drops tokens and credentials held in memory
pub trait SignOut: Send + Sync {
    fn sign_out(&self);
}

/// Coordinates sign-out with persistence of the logout reason
pub struct ForcedLogoutCoordinator {
    store: Arc<dyn CredentialStore>,
    sign_out: Arc<dyn SignOut>,
    authenticated: watch::Sender<bool>,
    logging_out: AtomicBool,
}

impl ForcedLogoutCoordinator {
    /// Create a coordinator in the signed-out state
    pub fn new(store: Arc<dyn CredentialStore>, sign_out: Arc<dyn SignOut>) -> Self {
        let (authenticated, _) = watch::channel(false);
        Self {
            store,
            sign_out,
            authenticated,
            logging_out: AtomicBool::new(false),
        }
    }

    /// Arm the coordinator after a successful login
    pub fn mark_authenticated(&self) {
        self.logging_out.store(false, Ordering::SeqCst);
        self.authenticated.send_replace(true);
        debug!("Marked session as authenticated");
    }

    /// Whether a user is currently signed in
    pub fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    /// Observe authentication changes
    pub fn subscribe_authenticated(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    /// Sign the user out and remember why
    ///
    /// Returns `false` if no one was signed in or a logout is already under
    /// way; the first reason wins.
    pub async fn force_logout(&self, reason: LogoutReason) -> bool {
        if !self.is_authenticated() {
            debug!("Ignoring {} logout: not authenticated", reason);
            return false;
        }
        if self.logging_out.swap(true, Ordering::SeqCst) {
            debug!("Ignoring {} logout: logout already in progress", reason);
            return false;
        }

        info!("Forcing logout: {}", reason);
        self.sign_out.sign_out();

        if let Err(e) = store::save_record(self.store.as_ref(), keys::LOGOUT_REASON, &reason).await
        {
            warn!("Failed to persist logout reason {}: {}", reason, e);
        }

        self.authenticated.send_replace(false);
        true
    }

    /// Read and clear the persisted reason (consume-once)
    pub async fn last_logout_reason(&self) -> Option<LogoutReason> {
        let reason = self.peek_last_logout_reason().await;

        if let Err(e) = self.store.delete(keys::LOGOUT_REASON).await {
            warn!("Failed to clear logout reason: {}", e);
        }

        reason
    }

    /// Read the persisted reason without clearing it
    pub async fn peek_last_logout_reason(&self) -> Option<LogoutReason> {
        match store::load_record(self.store.as_ref(), keys::LOGOUT_REASON).await {
            Ok(reason) => reason,
            Err(e) => {
                warn!("Failed to read logout reason: {}", e);
                None
            }
        }
    }
}
