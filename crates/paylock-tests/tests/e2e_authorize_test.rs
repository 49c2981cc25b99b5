//! End-to-end transaction authorization tests
//!
//! These tests run payments through a `SecurityContext` with scripted
//! biometric hardware, PIN screen and backend.

use std::sync::Arc;
use std::time::Duration;

use paylock_core::{Amount, BiometricKind, GuardConfig, MemoryCredentialStore, PendingTransaction};
use paylock_guard::authorize::PinInput;
use paylock_guard::biometric::NativeAuthResult;
use paylock_guard::testing::{
    RecordingCompletion, RecordingSignOut, ScriptedBiometricPlatform, ScriptedPinEntry,
    ScriptedPinVerifier,
};
use paylock_guard::{AuthorizationMethod, AuthorizationOutcome, Collaborators, SecurityContext};

struct Wallet {
    context: Arc<SecurityContext>,
    platform: Arc<ScriptedBiometricPlatform>,
    pin_entry: Arc<ScriptedPinEntry>,
    completion: Arc<RecordingCompletion>,
}

async fn wallet(
    platform: ScriptedBiometricPlatform,
    verifier: ScriptedPinVerifier,
    enable_biometric: bool,
) -> anyhow::Result<Wallet> {
    let platform = Arc::new(platform);
    let pin_entry = Arc::new(ScriptedPinEntry::new());
    let completion = Arc::new(RecordingCompletion::default());

    let context = SecurityContext::establish(
        GuardConfig::default(),
        "alice",
        Collaborators {
            store: Arc::new(MemoryCredentialStore::new()),
            biometric_platform: platform.clone(),
            pin_verifier: Arc::new(verifier),
            pin_entry: pin_entry.clone(),
            completion: completion.clone(),
            sign_out: Arc::new(RecordingSignOut::default()),
        },
    )
    .await?;

    if enable_biometric {
        let kind: BiometricKind = "Face ID".parse()?;
        context.biometric().enable_for_identifier("alice", kind).await?;
    }

    Ok(Wallet {
        context: Arc::new(context),
        platform,
        pin_entry,
        completion,
    })
}

fn bill() -> PendingTransaction {
    PendingTransaction::new(Amount::from_minor(12_345), "Water bill")
}

#[tokio::test]
async fn test_no_security_method_requires_setup() -> anyhow::Result<()> {
    let w = wallet(
        ScriptedBiometricPlatform::none(),
        ScriptedPinVerifier::unconfigured(),
        false,
    )
    .await?;

    let outcome = w.context.authorize(bill()).await;
    assert_eq!(outcome, AuthorizationOutcome::SecuritySetupRequired);
    assert_eq!(w.completion.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_biometric_cancel_never_falls_back() -> anyhow::Result<()> {
    let w = wallet(
        ScriptedBiometricPlatform::face(),
        ScriptedPinVerifier::with_pin("2468"),
        true,
    )
    .await?;
    w.platform.push_result(NativeAuthResult::error("user_cancel"));

    assert_eq!(w.context.authorize(bill()).await, AuthorizationOutcome::Cancelled);
    assert!(w.pin_entry.prompts().is_empty());
    assert_eq!(w.completion.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_biometric_failure_then_correct_pin() -> anyhow::Result<()> {
    let w = wallet(
        ScriptedBiometricPlatform::face(),
        ScriptedPinVerifier::with_pin("2468"),
        true,
    )
    .await?;
    w.platform
        .push_result(NativeAuthResult::error("authentication_failed"));
    w.pin_entry.push(PinInput::entered("2468"));

    let transaction = bill();
    let outcome = w.context.authorize(transaction.clone()).await;
    assert_eq!(
        outcome,
        AuthorizationOutcome::Authorized {
            method: AuthorizationMethod::Pin
        }
    );

    let prompts = w.pin_entry.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].amount, transaction.amount);
    assert_eq!(w.completion.transactions(), vec![transaction]);
    Ok(())
}

#[tokio::test]
async fn test_three_wrong_pins_never_authorize() -> anyhow::Result<()> {
    let w = wallet(
        ScriptedBiometricPlatform::none(),
        ScriptedPinVerifier::with_pin("2468"),
        false,
    )
    .await?;
    for wrong in ["1111", "2222", "3333"] {
        w.pin_entry.push(PinInput::entered(wrong));
    }

    // Script runs out after three entries and the user backs out
    let outcome = w.context.authorize(bill()).await;
    assert_eq!(outcome, AuthorizationOutcome::Cancelled);
    assert_eq!(w.pin_entry.prompts().len(), 4);
    assert_eq!(w.completion.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_authorize_is_rejected() -> anyhow::Result<()> {
    let w = wallet(
        ScriptedBiometricPlatform::none(),
        ScriptedPinVerifier::with_pin("2468"),
        false,
    )
    .await?;
    w.pin_entry.hold_when_empty();

    let context = Arc::clone(&w.context);
    let first = tokio::spawn(async move { context.authorize(bill()).await });
    while w.pin_entry.prompts().is_empty() {
        tokio::task::yield_now().await;
    }

    assert_eq!(w.context.authorize(bill()).await, AuthorizationOutcome::Busy);
    assert!(w.context.authorizer().cancel());
    assert_eq!(first.await?, AuthorizationOutcome::Cancelled);

    // The slot is free again
    w.pin_entry.push(PinInput::entered("2468"));
    assert!(w.context.authorize(bill()).await.is_authorized());
    assert_eq!(w.completion.count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_logout_blocks_further_payments() -> anyhow::Result<()> {
    let w = wallet(
        ScriptedBiometricPlatform::face(),
        ScriptedPinVerifier::with_pin("2468"),
        true,
    )
    .await?;

    assert!(w.context.authorize(bill()).await.is_authorized());
    assert!(w.context.logout().await);

    let outcome = w.context.authorize(bill()).await;
    assert!(matches!(
        outcome,
        AuthorizationOutcome::AuthenticationFailed { .. }
    ));
    assert_eq!(w.completion.count(), 1);
    Ok(())
}

/// The session idles out while the PIN screen is still open
#[tokio::test(start_paused = true)]
async fn test_idle_timeout_during_pin_entry_cancels_payment() -> anyhow::Result<()> {
    let w = wallet(
        ScriptedBiometricPlatform::none(),
        ScriptedPinVerifier::with_pin("1234"),
        false,
    )
    .await?;
    w.pin_entry.respond_after(Duration::from_secs(400));
    w.pin_entry.push(PinInput::entered("1234"));

    let outcome = w.context.authorize(bill()).await;
    assert_eq!(outcome, AuthorizationOutcome::Cancelled);
    assert_eq!(w.completion.count(), 0);
    assert!(w.context.ensure_active().is_err());

    let mut authenticated = w.context.coordinator().subscribe_authenticated();
    while *authenticated.borrow_and_update() {
        authenticated.changed().await?;
    }
    Ok(())
}
