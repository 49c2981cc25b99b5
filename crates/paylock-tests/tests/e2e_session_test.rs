//! End-to-end session security tests
//!
//! These tests drive a full `SecurityContext` through idle, background and
//! relaunch scenarios on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use paylock_core::{
    CredentialStore, FileCredentialStore, GuardConfig, LogoutReason, MemoryCredentialStore,
};
use paylock_guard::session::{ForcedLogoutCoordinator, SessionEvent, SessionState};
use paylock_guard::testing::{
    RecordingCompletion, RecordingSignOut, ScriptedBiometricPlatform, ScriptedPinEntry,
    ScriptedPinVerifier,
};
use paylock_guard::{Collaborators, LifecycleEvent, SecurityContext};
use tokio::time::Instant;

fn collaborators(
    store: Arc<dyn CredentialStore>,
    sign_out: Arc<RecordingSignOut>,
) -> Collaborators {
    Collaborators {
        store,
        biometric_platform: Arc::new(ScriptedBiometricPlatform::face()),
        pin_verifier: Arc::new(ScriptedPinVerifier::with_pin("1234")),
        pin_entry: Arc::new(ScriptedPinEntry::new()),
        completion: Arc::new(RecordingCompletion::default()),
        sign_out,
    }
}

async fn settle(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

/// No activity: warned at 180s, expired at 300s, banner reason on next launch
#[tokio::test(start_paused = true)]
async fn test_idle_timeout_end_to_end() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(dir.path())?);
    let sign_out = Arc::new(RecordingSignOut::default());

    let context = SecurityContext::establish(
        GuardConfig::default(),
        "alice",
        collaborators(Arc::clone(&store), sign_out.clone()),
    )
    .await?;
    let mut authenticated = context.coordinator().subscribe_authenticated();

    settle(179).await;
    assert_eq!(context.security_status().state, SessionState::Active);

    settle(2).await;
    let status = context.security_status();
    assert_eq!(status.state, SessionState::Warned);
    assert!(status.warning_shown);
    assert_eq!(status.idle_remaining_formatted(), "01:59");

    settle(120).await;
    assert_eq!(context.security_status().state, SessionState::Expired);
    assert_eq!(
        context.security_status().expiry_reason,
        Some(LogoutReason::IdleTimeout)
    );

    // Signed-out is only observable once the reason is on disk
    while *authenticated.borrow_and_update() {
        authenticated.changed().await?;
    }
    assert_eq!(sign_out.count(), 1);
    drop(context);

    // Next launch reads the reason once
    let relaunch = ForcedLogoutCoordinator::new(store, Arc::new(RecordingSignOut::default()));
    let reason = relaunch.last_logout_reason().await;
    assert_eq!(reason, Some(LogoutReason::IdleTimeout));
    assert!(reason.and_then(|r| r.banner_message()).is_some());
    assert_eq!(relaunch.last_logout_reason().await, None);
    Ok(())
}

/// Continuing from the warning keeps the session, touches keep it alive
#[tokio::test(start_paused = true)]
async fn test_continue_from_warning() -> anyhow::Result<()> {
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
    let sign_out = Arc::new(RecordingSignOut::default());
    let context = SecurityContext::establish(
        GuardConfig::default(),
        "alice",
        collaborators(store, sign_out.clone()),
    )
    .await?;
    let tracker = context.tracker();

    settle(200).await;
    assert_eq!(context.security_status().state, SessionState::Warned);

    // Plain touches do not dismiss the warning
    assert!(!tracker.on_touch_start());
    assert_eq!(context.security_status().state, SessionState::Warned);

    assert!(context.extend_session());
    for _ in 0..10 {
        settle(100).await;
        tracker.on_touch_start();
    }
    assert_eq!(context.security_status().state, SessionState::Active);
    assert_eq!(sign_out.count(), 0);
    Ok(())
}

/// Away longer than the background budget: expired on return, no warning
#[tokio::test(start_paused = true)]
async fn test_background_timeout_end_to_end() -> anyhow::Result<()> {
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
    let sign_out = Arc::new(RecordingSignOut::default());
    let context = SecurityContext::establish(
        GuardConfig::default(),
        "alice",
        collaborators(Arc::clone(&store), sign_out.clone()),
    )
    .await?;
    let mut events = context.engine().subscribe();

    settle(30).await;
    context
        .handle_lifecycle(LifecycleEvent::Background { at: Instant::now() })
        .await;
    settle(600).await;
    assert!(context.security_status().in_background);
    assert_eq!(context.security_status().state, SessionState::Active);

    context
        .handle_lifecycle(LifecycleEvent::Foreground { at: Instant::now() })
        .await;
    let status = context.security_status();
    assert_eq!(status.state, SessionState::Expired);
    assert_eq!(status.expiry_reason, Some(LogoutReason::BackgroundTimeout));
    assert!(!status.warning_shown);

    let first = events.recv().await?;
    assert_eq!(
        first,
        SessionEvent::Expired {
            reason: LogoutReason::BackgroundTimeout
        }
    );

    settle(1).await;
    assert_eq!(sign_out.count(), 1);
    assert_eq!(
        context.coordinator().last_logout_reason().await,
        Some(LogoutReason::BackgroundTimeout)
    );
    Ok(())
}

/// A short trip to the background counts as activity
#[tokio::test(start_paused = true)]
async fn test_short_background_resets_idle() -> anyhow::Result<()> {
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
    let context = SecurityContext::establish(
        GuardConfig::default(),
        "alice",
        collaborators(store, Arc::new(RecordingSignOut::default())),
    )
    .await?;
    let tracker = context.tracker();

    settle(170).await;
    tracker.on_lifecycle(LifecycleEvent::background_now());
    settle(60).await;
    tracker.on_lifecycle(LifecycleEvent::foreground_now());

    let status = context.security_status();
    assert_eq!(status.state, SessionState::Active);
    assert_eq!(status.idle_remaining, Duration::from_secs(300));

    settle(179).await;
    assert_eq!(context.security_status().state, SessionState::Active);
    Ok(())
}
