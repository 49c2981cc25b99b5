//! Scripted collaborators for tests
//!
//! Enabled for this crate's unit tests and, through the `testing` feature, for
//! downstream integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use paylock_core::{BiometricKind, CredentialStore, Error, PendingTransaction, Result};

use crate::authorize::{
    Pin, PinEntry, PinInput, PinPrompt, PinVerification, PinVerifier, TransactionAuthorizer,
};
use crate::biometric::{AuthenticateOptions, BiometricPlatform, NativeAuthResult};
use crate::session::SignOut;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Biometric platform with scripted device facts and dialog results
///
/// Dialog results are consumed in order; an empty script succeeds.
pub struct ScriptedBiometricPlatform {
    hardware: AtomicBool,
    enrolled: AtomicBool,
    kinds: Mutex<Vec<BiometricKind>>,
    trusts_fingerprint: bool,
    fail_queries: bool,
    results: Mutex<VecDeque<NativeAuthResult>>,
    challenges: AtomicUsize,
}

impl ScriptedBiometricPlatform {
    pub fn with_kinds(kinds: Vec<BiometricKind>) -> Self {
        Self {
            hardware: AtomicBool::new(true),
            enrolled: AtomicBool::new(true),
            kinds: Mutex::new(kinds),
            trusts_fingerprint: false,
            fail_queries: false,
            results: Mutex::new(VecDeque::new()),
            challenges: AtomicUsize::new(0),
        }
    }

    /// Enrolled face recognition
    pub fn face() -> Self {
        Self::with_kinds(vec![BiometricKind::Face])
    }

    /// No biometric hardware at all
    pub fn none() -> Self {
        let platform = Self::with_kinds(Vec::new());
        platform.hardware.store(false, Ordering::SeqCst);
        platform.enrolled.store(false, Ordering::SeqCst);
        platform
    }

    pub fn trusting_fingerprint(mut self) -> Self {
        self.trusts_fingerprint = true;
        self
    }

    /// Every device query returns an error
    pub fn failing_queries(mut self) -> Self {
        self.fail_queries = true;
        self
    }

    pub fn set_enrolled(&self, enrolled: bool) {
        self.enrolled.store(enrolled, Ordering::SeqCst);
    }

    pub fn set_kinds(&self, kinds: Vec<BiometricKind>) {
        *lock(&self.kinds) = kinds;
    }

    pub fn push_result(&self, result: NativeAuthResult) {
        lock(&self.results).push_back(result);
    }

    /// Number of native dialogs shown
    pub fn challenges(&self) -> usize {
        self.challenges.load(Ordering::SeqCst)
    }

    fn query<T>(&self, value: T) -> Result<T> {
        if self.fail_queries {
            return Err(Error::StorageFailure("biometric service unreachable".into()));
        }
        Ok(value)
    }
}

#[async_trait]
impl BiometricPlatform for ScriptedBiometricPlatform {
    async fn has_hardware(&self) -> Result<bool> {
        self.query(self.hardware.load(Ordering::SeqCst))
    }

    async fn is_enrolled(&self) -> Result<bool> {
        self.query(self.enrolled.load(Ordering::SeqCst))
    }

    async fn supported_kinds(&self) -> Result<Vec<BiometricKind>> {
        self.query(lock(&self.kinds).clone())
    }

    fn trusts_fingerprint(&self) -> bool {
        self.trusts_fingerprint
    }

    async fn authenticate(&self, _options: &AuthenticateOptions) -> Result<NativeAuthResult> {
        self.challenges.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.results)
            .pop_front()
            .unwrap_or_else(NativeAuthResult::success))
    }
}

/// PIN screen that replays scripted input and records every prompt
///
/// An exhausted script cancels, unless [`hold_when_empty`](Self::hold_when_empty)
/// was called, in which case the screen stays open forever.
#[derive(Default)]
pub struct ScriptedPinEntry {
    inputs: Mutex<VecDeque<PinInput>>,
    prompts: Mutex<Vec<PinPrompt>>,
    hold: AtomicBool,
    think_time: Mutex<Option<Duration>>,
}

impl ScriptedPinEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, input: PinInput) {
        lock(&self.inputs).push_back(input);
    }

    pub fn hold_when_empty(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// User takes `delay` to type each entry
    pub fn respond_after(&self, delay: Duration) {
        *lock(&self.think_time) = Some(delay);
    }

    pub fn prompts(&self) -> Vec<PinPrompt> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl PinEntry for ScriptedPinEntry {
    async fn request_pin(&self, prompt: &PinPrompt) -> PinInput {
        lock(&self.prompts).push(prompt.clone());
        let think_time = *lock(&self.think_time);
        if let Some(delay) = think_time {
            tokio::time::sleep(delay).await;
        }
        let next = lock(&self.inputs).pop_front();
        match next {
            Some(input) => input,
            None if self.hold.load(Ordering::SeqCst) => std::future::pending().await,
            None => PinInput::Cancelled,
        }
    }
}

/// Backend PIN check against a fixed PIN
pub struct ScriptedPinVerifier {
    pin: Option<String>,
    reachable: bool,
    fail_transport: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedPinVerifier {
    pub fn with_pin(pin: &str) -> Self {
        Self {
            pin: Some(pin.to_string()),
            reachable: true,
            fail_transport: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Account without a PIN
    pub fn unconfigured() -> Self {
        Self {
            pin: None,
            ..Self::with_pin("")
        }
    }

    /// Backend that cannot be reached at all
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::with_pin("0000")
        }
    }

    /// Next `verify` call fails with a transport error
    pub fn fail_next_transport(&self) {
        self.fail_transport.store(true, Ordering::SeqCst);
    }

    /// Number of `verify` calls that reached the backend
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PinVerifier for ScriptedPinVerifier {
    async fn is_configured(&self) -> Result<bool> {
        if !self.reachable {
            return Err(Error::AuthenticationFailed("backend unreachable".into()));
        }
        Ok(self.pin.is_some())
    }

    async fn verify(&self, pin: &Pin) -> Result<PinVerification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.reachable || self.fail_transport.swap(false, Ordering::SeqCst) {
            return Err(Error::AuthenticationFailed("connection reset".into()));
        }
        match self.pin.as_deref() {
            Some(expected) if expected == pin.expose() => Ok(PinVerification::success()),
            _ => Ok(PinVerification::failure("Incorrect PIN")),
        }
    }
}

/// Completion handler that records authorized transactions
#[derive(Default)]
pub struct RecordingCompletion {
    transactions: Mutex<Vec<PendingTransaction>>,
    watched: Mutex<Option<Weak<TransactionAuthorizer>>>,
    busy_seen: Mutex<Option<bool>>,
}

impl RecordingCompletion {
    pub fn count(&self) -> usize {
        lock(&self.transactions).len()
    }

    pub fn transactions(&self) -> Vec<PendingTransaction> {
        lock(&self.transactions).clone()
    }

    /// Record whether `authorizer` reports busy while the completion runs
    pub fn watch_busy(&self, authorizer: Weak<TransactionAuthorizer>) {
        *lock(&self.watched) = Some(authorizer);
    }

    pub fn busy_during_completion(&self) -> Option<bool> {
        *lock(&self.busy_seen)
    }
}

#[async_trait]
impl crate::authorize::CompletionHandler for RecordingCompletion {
    async fn on_authorized(&self, transaction: PendingTransaction) {
        let watched = lock(&self.watched).as_ref().and_then(Weak::upgrade);
        if let Some(authorizer) = watched {
            *lock(&self.busy_seen) = Some(authorizer.is_busy());
        }
        lock(&self.transactions).push(transaction);
    }
}

/// Sign-out hook that counts invocations
#[derive(Default)]
pub struct RecordingSignOut {
    calls: AtomicUsize,
}

impl RecordingSignOut {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SignOut for RecordingSignOut {
    fn sign_out(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Credential store whose every operation fails
pub struct FailingCredentialStore;

#[async_trait]
impl CredentialStore for FailingCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Err(Error::StorageFailure(format!("cannot read {}", key)))
    }

    async fn set(&self, key: &str, _value: &str) -> Result<()> {
        Err(Error::StorageFailure(format!("cannot write {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Err(Error::StorageFailure(format!("cannot delete {}", key)))
    }
}
