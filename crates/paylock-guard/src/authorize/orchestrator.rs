//! Biometric -> PIN authorization chain for pending transactions

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use paylock_core::{
    BiometricPromptConfig, Error, PendingTransaction, PinPolicy, Result, TransactionId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::pin::{Pin, PinEntry, PinInput, PinPrompt, PinVerifier};
use crate::biometric::{BiometricOutcome, BiometricService};

/// Method used for an authorization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationMethod {
    Biometric,
    Pin,
}

/// Snapshot of the running flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationAttempt {
    pub transaction_id: TransactionId,
    pub method: AuthorizationMethod,
    /// Attempts made with the current method
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

/// Terminal result of [`TransactionAuthorizer::authorize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Authorized { method: AuthorizationMethod },
    Cancelled,
    /// Neither a PIN nor usable biometrics are set up
    SecuritySetupRequired,
    AuthenticationFailed { reason: String },
    /// Another authorization is already running; it was left untouched
    Busy,
}

impl AuthorizationOutcome {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthorizationOutcome::Authorized { .. })
    }

    /// Convert to a `Result` for callers that propagate with `?`
    pub fn into_result(self) -> Result<AuthorizationMethod> {
        match self {
            AuthorizationOutcome::Authorized { method } => Ok(method),
            AuthorizationOutcome::Cancelled => Err(Error::Cancelled),
            AuthorizationOutcome::SecuritySetupRequired => Err(Error::ConfigurationMissing(
                "no PIN or biometric method set up".into(),
            )),
            AuthorizationOutcome::AuthenticationFailed { reason } => {
                Err(Error::AuthenticationFailed(reason))
            }
            AuthorizationOutcome::Busy => Err(Error::AuthenticationFailed(
                "another authorization is in progress".into(),
            )),
        }
    }
}

type LivenessCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// Side effect run once a transaction is authorized (e.g. submit the payment)
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn on_authorized(&self, transaction: PendingTransaction);
}

struct InFlight {
    transaction: PendingTransaction,
    attempt: AuthorizationAttempt,
    cancel_tx: watch::Sender<bool>,
}

/// Clears the in-flight slot however the flow ends
struct SlotGuard<'a> {
    slot: &'a Mutex<Option<InFlight>>,
}

impl SlotGuard<'_> {
    fn release(self) -> Option<PendingTransaction> {
        lock(self.slot).take().map(|flight| flight.transaction)
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        lock(self.slot).take();
    }
}

fn lock(slot: &Mutex<Option<InFlight>>) -> MutexGuard<'_, Option<InFlight>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves pending transactions to exactly one terminal outcome
pub struct TransactionAuthorizer {
    biometric: Arc<BiometricService>,
    pin_verifier: Arc<dyn PinVerifier>,
    pin_entry: Arc<dyn PinEntry>,
    completion: Arc<dyn CompletionHandler>,
    identifier: String,
    prompt: BiometricPromptConfig,
    pin_policy: PinPolicy,
    liveness: Option<LivenessCheck>,
    in_flight: Mutex<Option<InFlight>>,
}

impl TransactionAuthorizer {
    pub fn new(
        identifier: impl Into<String>,
        biometric: Arc<BiometricService>,
        pin_verifier: Arc<dyn PinVerifier>,
        pin_entry: Arc<dyn PinEntry>,
        completion: Arc<dyn CompletionHandler>,
    ) -> Self {
        Self {
            biometric,
            pin_verifier,
            pin_entry,
            completion,
            identifier: identifier.into(),
            prompt: BiometricPromptConfig::default(),
            pin_policy: PinPolicy::default(),
            liveness: None,
            in_flight: Mutex::new(None),
        }
    }

    pub fn with_prompt(mut self, prompt: BiometricPromptConfig) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_pin_policy(mut self, policy: PinPolicy) -> Self {
        self.pin_policy = policy;
        self
    }

    /// Only hand authorized transactions to the completion handler while
    /// `is_live` holds
    pub fn with_liveness<F>(mut self, is_live: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.liveness = Some(Box::new(is_live));
        self
    }

    fn is_live(&self) -> bool {
        self.liveness.as_ref().map_or(true, |is_live| is_live())
    }

    /// Authorize `transaction`
    ///
    /// The completion handler runs at most once, only on
    /// [`AuthorizationOutcome::Authorized`], after the in-flight slot is
    /// cleared. The transaction is dropped after any other outcome.
    pub async fn authorize(&self, transaction: PendingTransaction) -> AuthorizationOutcome {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut slot = lock(&self.in_flight);
            if let Some(flight) = slot.as_ref() {
                debug!(
                    "Rejecting {}: {} still in flight",
                    transaction.id.short(),
                    flight.transaction.id.short()
                );
                return AuthorizationOutcome::Busy;
            }
            *slot = Some(InFlight {
                attempt: AuthorizationAttempt {
                    transaction_id: transaction.id,
                    method: AuthorizationMethod::Biometric,
                    attempt_count: 0,
                    last_error: None,
                },
                transaction: transaction.clone(),
                cancel_tx,
            });
        }
        let guard = SlotGuard {
            slot: &self.in_flight,
        };

        info!(
            "Authorizing {} for {} ({})",
            transaction.id.short(),
            transaction.amount,
            transaction.payload_description
        );

        let mut outcome = tokio::select! {
            outcome = self.run_chain(&transaction) => outcome,
            _ = cancelled(cancel_rx) => {
                debug!("Authorization of {} cancelled", transaction.id.short());
                AuthorizationOutcome::Cancelled
            }
        };

        if outcome.is_authorized() && !self.is_live() {
            warn!(
                "Session ended while authorizing {}, discarding",
                transaction.id.short()
            );
            outcome = AuthorizationOutcome::AuthenticationFailed {
                reason: "session expired".into(),
            };
        }

        let pending = guard.release();
        info!("Authorization of {} finished: {:?}", transaction.id.short(), outcome);

        if outcome.is_authorized() {
            if let Some(pending) = pending {
                self.completion.on_authorized(pending).await;
            }
        }
        outcome
    }

    /// Abort the running flow; it resolves to `Cancelled`
    pub fn cancel(&self) -> bool {
        match lock(&self.in_flight).as_ref() {
            Some(flight) => {
                flight.cancel_tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the running attempt
    pub fn current_attempt(&self) -> Option<AuthorizationAttempt> {
        lock(&self.in_flight)
            .as_ref()
            .map(|flight| flight.attempt.clone())
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    async fn run_chain(&self, transaction: &PendingTransaction) -> AuthorizationOutcome {
        let pin_configured = match self.pin_verifier.is_configured().await {
            Ok(configured) => configured,
            Err(e) => {
                warn!("Could not determine PIN configuration: {}", e);
                false
            }
        };
        let biometric_ready = self
            .biometric
            .is_biometric_enabled_for_user(&self.identifier)
            .await
            && self.biometric.is_available().await;

        if !pin_configured && !biometric_ready {
            warn!("No usable security method for {}", self.identifier);
            return AuthorizationOutcome::SecuritySetupRequired;
        }

        if biometric_ready {
            self.update_attempt(|attempt| {
                attempt.method = AuthorizationMethod::Biometric;
                attempt.attempt_count = 1;
            });

            match self.biometric.authenticate_with(&self.prompt).await {
                BiometricOutcome::Success => {
                    return AuthorizationOutcome::Authorized {
                        method: AuthorizationMethod::Biometric,
                    };
                }
                BiometricOutcome::Cancelled => return AuthorizationOutcome::Cancelled,
                BiometricOutcome::Failed(failure) => {
                    info!("Biometric attempt failed: {}", failure);
                    self.update_attempt(|attempt| attempt.last_error = Some(failure.to_string()));
                    if !pin_configured {
                        return AuthorizationOutcome::AuthenticationFailed {
                            reason: failure.to_string(),
                        };
                    }
                }
            }
        }

        self.run_pin(transaction).await
    }

    async fn run_pin(&self, transaction: &PendingTransaction) -> AuthorizationOutcome {
        let mut attempt = 0u32;
        let mut error: Option<String> = None;

        loop {
            attempt += 1;
            let last_error = error.clone();
            self.update_attempt(|snapshot| {
                snapshot.method = AuthorizationMethod::Pin;
                snapshot.attempt_count = attempt;
                snapshot.last_error = last_error;
            });

            let prompt = PinPrompt {
                transaction_id: transaction.id,
                amount: transaction.amount,
                description: transaction.payload_description.clone(),
                attempt,
                error: error.take(),
            };

            let digits = match self.pin_entry.request_pin(&prompt).await {
                PinInput::Entered(digits) => digits,
                PinInput::Cancelled => return AuthorizationOutcome::Cancelled,
            };

            let pin = match Pin::parse(&digits, &self.pin_policy) {
                Ok(pin) => pin,
                Err(e) => {
                    error = Some(e.to_string());
                    continue;
                }
            };

            match self.pin_verifier.verify(&pin).await {
                Ok(verification) if verification.is_success() => {
                    return AuthorizationOutcome::Authorized {
                        method: AuthorizationMethod::Pin,
                    };
                }
                Ok(verification) => {
                    debug!("PIN attempt {} rejected", attempt);
                    error = Some(
                        verification
                            .message
                            .unwrap_or_else(|| "Incorrect PIN".to_string()),
                    );
                }
                Err(e) => {
                    warn!("PIN verification failed: {}", e);
                    error = Some(format!("Could not verify PIN: {}", e));
                }
            }
        }
    }

    fn update_attempt(&self, update: impl FnOnce(&mut AuthorizationAttempt)) {
        if let Some(flight) = lock(&self.in_flight).as_mut() {
            update(&mut flight.attempt);
        }
    }
}

async fn cancelled(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
