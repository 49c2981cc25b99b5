//! Per-login security context
//!
//! Everything session-scoped lives here and dies with the login: the timer
//! engine, the forced-logout wiring and the transaction authorizer. Nothing is
//! process-global, so a fresh login always starts from a clean session.

use std::sync::{Arc, Mutex, PoisonError};

use paylock_core::{
    CredentialStore, Error, GuardConfig, LogoutReason, PendingTransaction, Result,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::authorize::{
    AuthorizationOutcome, CompletionHandler, PinEntry, PinVerifier, TransactionAuthorizer,
};
use crate::biometric::{BiometricPlatform, BiometricService};
use crate::session::{
    ActivityTracker, ForcedLogoutCoordinator, LifecycleEvent, SecurityStatus, SessionEvent,
    SessionState, SessionTimerEngine, SignOut,
};

/// Host-provided collaborators
pub struct Collaborators {
    pub store: Arc<dyn CredentialStore>,
    pub biometric_platform: Arc<dyn BiometricPlatform>,
    pub pin_verifier: Arc<dyn PinVerifier>,
    pub pin_entry: Arc<dyn PinEntry>,
    pub completion: Arc<dyn CompletionHandler>,
    pub sign_out: Arc<dyn SignOut>,
}

/// Security state of one authenticated session
pub struct SecurityContext {
    identifier: String,
    engine: SessionTimerEngine,
    coordinator: Arc<ForcedLogoutCoordinator>,
    biometric: Arc<BiometricService>,
    authorizer: Arc<TransactionAuthorizer>,
    expiry_task: Mutex<Option<JoinHandle<()>>>,
}

impl SecurityContext {
    /// Set up security for a user who just logged in
    ///
    /// Starts both session countdowns; an expiry of any kind forces a logout
    /// with the matching reason. Must be called from within a tokio runtime.
    pub async fn establish(
        config: GuardConfig,
        identifier: impl Into<String>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let identifier = identifier.into();

        let coordinator = Arc::new(ForcedLogoutCoordinator::new(
            Arc::clone(&collaborators.store),
            collaborators.sign_out,
        ));
        coordinator.mark_authenticated();

        let biometric = Arc::new(BiometricService::new(
            collaborators.biometric_platform,
            collaborators.store,
        ));
        biometric.initialize().await;

        let engine = SessionTimerEngine::new(config.session.clone());

        let authorizer = {
            let session_live = engine.liveness();
            let coordinator = Arc::clone(&coordinator);
            Arc::new(
                TransactionAuthorizer::new(
                    identifier.clone(),
                    Arc::clone(&biometric),
                    collaborators.pin_verifier,
                    collaborators.pin_entry,
                    collaborators.completion,
                )
                .with_prompt(config.biometric.clone())
                .with_pin_policy(config.pin.clone())
                .with_liveness(move || session_live() && coordinator.is_authenticated()),
            )
        };

        let expiry_task = tokio::spawn(forward_expiry(
            engine.subscribe(),
            Arc::clone(&authorizer),
            Arc::clone(&coordinator),
        ));
        engine.initialize(
            |remaining| debug!("Idle warning raised, {}s left", remaining.as_secs()),
            |reason| debug!("Session expiry signalled: {}", reason),
        );

        info!("Security context established for {}", identifier);
        Ok(Self {
            identifier,
            engine,
            coordinator,
            biometric,
            authorizer,
            expiry_task: Mutex::new(Some(expiry_task)),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Tracker for touch handlers and lifecycle hooks
    pub fn tracker(&self) -> ActivityTracker {
        self.engine.tracker()
    }

    pub fn engine(&self) -> &SessionTimerEngine {
        &self.engine
    }

    pub fn coordinator(&self) -> &Arc<ForcedLogoutCoordinator> {
        &self.coordinator
    }

    pub fn biometric(&self) -> &Arc<BiometricService> {
        &self.biometric
    }

    pub fn authorizer(&self) -> &TransactionAuthorizer {
        &self.authorizer
    }

    pub fn security_status(&self) -> SecurityStatus {
        self.engine.security_status()
    }

    /// The user chose to stay signed in
    pub fn extend_session(&self) -> bool {
        self.engine.extend_session()
    }

    /// Authorize a transaction within this session
    ///
    /// An expired session never authorizes anything.
    pub async fn authorize(&self, transaction: PendingTransaction) -> AuthorizationOutcome {
        if self.engine.state() == SessionState::Expired {
            warn!(
                "Refusing to authorize {}: session expired",
                transaction.id.short()
            );
            return AuthorizationOutcome::AuthenticationFailed {
                reason: "session expired".into(),
            };
        }
        self.authorizer.authorize(transaction).await
    }

    /// Route an app lifecycle transition
    ///
    /// Returning to the foreground also re-checks biometric enrollment.
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) {
        self.engine.handle_lifecycle(event);

        if matches!(event, LifecycleEvent::Foreground { .. })
            && self.engine.state() != SessionState::Expired
        {
            self.check_biometric_integrity().await;
        }
    }

    /// Sign out if the device's biometrics no longer match the stored profile
    ///
    /// Returns whether a logout was forced.
    pub async fn check_biometric_integrity(&self) -> bool {
        // The device slot may hold another account's profile
        match self.biometric.stored_profile().await {
            Some(profile) if profile.identifier == self.identifier => {}
            _ => return false,
        }
        if !self.biometric.enrollment_changed().await {
            return false;
        }
        if let Err(e) = self.biometric.disable().await {
            warn!("Failed to disable stale biometric profile: {}", e);
        }
        self.force_logout(LogoutReason::BiometricChanged).await
    }

    /// Expire the session and force a logout with `reason`
    pub async fn force_logout(&self, reason: LogoutReason) -> bool {
        self.authorizer.cancel();
        self.engine.expire(reason);
        let forced = self.coordinator.force_logout(reason).await;
        self.shutdown();
        forced
    }

    /// User-initiated logout
    pub async fn logout(&self) -> bool {
        self.force_logout(LogoutReason::UserInitiated).await
    }

    /// Stop timers and background tasks
    pub fn shutdown(&self) {
        self.engine.cleanup();
        let task = self
            .expiry_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Error for operations attempted without a live session
    pub fn ensure_active(&self) -> Result<()> {
        if self.coordinator.is_authenticated() && self.engine.state() != SessionState::Expired {
            Ok(())
        } else {
            Err(Error::AuthenticationFailed("session expired".into()))
        }
    }
}

impl Drop for SecurityContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn forward_expiry(
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
    authorizer: Arc<TransactionAuthorizer>,
    coordinator: Arc<ForcedLogoutCoordinator>,
) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Expired { reason }) => {
                if authorizer.cancel() {
                    info!("Cancelled in-flight authorization: session expired ({})", reason);
                }
                coordinator.force_logout(reason).await;
                break;
            }
            Ok(SessionEvent::Warning { .. }) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Session event consumer lagged by {}", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
