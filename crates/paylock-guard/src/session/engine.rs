//! Session timer engine
//!
//! Runs the idle countdown and the absolute token countdown as two independent
//! tasks over one [`SecuritySession`]. Activity, continuation and lifecycle
//! changes wake the idle task through a `watch` channel so it can recompute its
//! deadline; `cleanup()` stops both tasks through a shutdown signal.
//!
//! Any panic raised while evaluating the session or inside a user callback is
//! contained and turned into an expiry: a session whose timing state is unknown
//! is never kept alive.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use paylock_core::{Error, LogoutReason, SessionConfig};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::activity::ActivityTracker;
use super::state::{SecuritySession, SessionState, SessionTransition};
use super::LifecycleEvent;

type WarningCallback = Box<dyn Fn(Duration) + Send + Sync>;
type ExpireCallback = Box<dyn Fn(LogoutReason) + Send + Sync>;

/// Signal emitted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Idle warning raised
    Warning { remaining: Duration },
    /// Session expired
    Expired { reason: LogoutReason },
}

/// Snapshot of the session for rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityStatus {
    pub state: SessionState,
    pub idle_remaining: Duration,
    pub token_remaining: Duration,
    pub warning_shown: bool,
    pub in_background: bool,
    pub expiry_reason: Option<LogoutReason>,
    /// Fault that forced the expiry, if any
    pub fault: Option<String>,
}

impl SecurityStatus {
    /// Idle time left formatted as MM:SS
    pub fn idle_remaining_formatted(&self) -> String {
        let secs = self.idle_remaining.as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}

struct Callbacks {
    on_warning: WarningCallback,
    on_expire: ExpireCallback,
}

/// State shared between the engine handle, its tasks and activity trackers
pub(crate) struct EngineShared {
    session: Mutex<SecuritySession>,
    wake_tx: watch::Sender<()>,
    events: broadcast::Sender<SessionEvent>,
    callbacks: Mutex<Option<Callbacks>>,
    expire_fired: AtomicBool,
    fault: Mutex<Option<String>>,
}

impl EngineShared {
    fn lock_session(&self) -> MutexGuard<'_, SecuritySession> {
        // A poisoned lock means an evaluation panicked; the fault path expires the session
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_callbacks(&self) -> MutexGuard<'_, Option<Callbacks>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_fault(&self, fault: Error) {
        error!("{}, expiring session", fault);
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| fault.to_string());
    }

    fn wake(&self) {
        self.wake_tx.send_replace(());
    }

    pub(crate) fn record_activity(&self, now: Instant) -> bool {
        let moved = self.lock_session().record_activity(now);
        if moved {
            self.wake();
        }
        moved
    }

    pub(crate) fn handle_lifecycle(&self, event: LifecycleEvent) {
        let transition = match event {
            LifecycleEvent::Background { at } => {
                debug!("App moved to background");
                self.lock_session().enter_background(at);
                None
            }
            LifecycleEvent::Foreground { at } => {
                debug!("App returned to foreground");
                self.guarded(LogoutReason::BackgroundTimeout, |session| session.resume(at))
            }
        };
        self.wake();
        if let Some(transition) = transition {
            self.dispatch(transition);
        }
    }

    fn extend(&self, now: Instant) -> bool {
        let extended = self.lock_session().extend(now);
        if extended {
            debug!("Session extended");
            self.wake();
        }
        extended
    }

    fn expire(&self, reason: LogoutReason) -> bool {
        let transition = self.lock_session().expire(reason);
        match transition {
            Some(transition) => {
                self.dispatch(transition);
                true
            }
            None => false,
        }
    }

    fn evaluate(&self, now: Instant, fault_reason: LogoutReason) {
        if let Some(transition) = self.guarded(fault_reason, |session| session.evaluate(now)) {
            self.dispatch(transition);
        }
    }

    /// Run a session step; a panic inside it expires the session
    fn guarded<F>(&self, fault_reason: LogoutReason, step: F) -> Option<SessionTransition>
    where
        F: FnOnce(&mut SecuritySession) -> Option<SessionTransition>,
    {
        let result = panic::catch_unwind(AssertUnwindSafe(|| step(&mut self.lock_session())));
        match result {
            Ok(transition) => transition,
            Err(payload) => {
                self.record_fault(Error::TimerFault(panic_message(payload.as_ref())));
                self.lock_session().expire(fault_reason)
            }
        }
    }

    fn status(&self, now: Instant) -> SecurityStatus {
        let fault = self
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let session = self.lock_session();
        SecurityStatus {
            state: session.state(),
            idle_remaining: session.idle_remaining(now),
            token_remaining: session.token_remaining(now),
            warning_shown: session.idle_warning_shown(),
            in_background: session.is_backgrounded(),
            expiry_reason: session.expiry_reason(),
            fault,
        }
    }

    fn dispatch(&self, transition: SessionTransition) {
        match transition {
            SessionTransition::Warned { remaining } => {
                info!("Idle warning: {}s remaining", remaining.as_secs());
                let _ = self.events.send(SessionEvent::Warning { remaining });

                let fault = {
                    let callbacks = self.lock_callbacks();
                    match callbacks.as_ref() {
                        Some(cb) => {
                            panic::catch_unwind(AssertUnwindSafe(|| (cb.on_warning)(remaining)))
                                .err()
                        }
                        None => None,
                    }
                };
                if let Some(payload) = fault {
                    self.record_fault(Error::TimerFault(format!(
                        "warning callback panicked: {}",
                        panic_message(payload.as_ref())
                    )));
                    self.expire(LogoutReason::IdleTimeout);
                }
            }
            SessionTransition::Expired(reason) => {
                if self.expire_fired.swap(true, Ordering::SeqCst) {
                    return;
                }
                info!("Session expired: {}", reason);
                self.wake();
                let _ = self.events.send(SessionEvent::Expired { reason });

                let callbacks = self.lock_callbacks();
                if let Some(cb) = callbacks.as_ref() {
                    if panic::catch_unwind(AssertUnwindSafe(|| (cb.on_expire)(reason))).is_err() {
                        error!("Expire callback panicked");
                    }
                }
            }
        }
    }
}

struct RunningTimers {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Idle and token countdowns for one authenticated session
pub struct SessionTimerEngine {
    shared: Arc<EngineShared>,
    timers: Mutex<Option<RunningTimers>>,
}

impl SessionTimerEngine {
    /// Create an engine for a session starting now
    pub fn new(config: SessionConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Create an engine for a session that started at `now`
    pub fn starting_at(config: SessionConfig, now: Instant) -> Self {
        let (wake_tx, _) = watch::channel(());
        let (events, _) = broadcast::channel(16);

        Self {
            shared: Arc::new(EngineShared {
                session: Mutex::new(SecuritySession::start(config, now)),
                wake_tx,
                events,
                callbacks: Mutex::new(None),
                expire_fired: AtomicBool::new(false),
                fault: Mutex::new(None),
            }),
            timers: Mutex::new(None),
        }
    }

    /// Start both countdowns
    ///
    /// Must be called from within a tokio runtime. Calling it again replaces
    /// the callbacks and restarts the tasks; the session itself is untouched.
    pub fn initialize<W, E>(&self, on_warning: W, on_expire: E)
    where
        W: Fn(Duration) + Send + Sync + 'static,
        E: Fn(LogoutReason) + Send + Sync + 'static,
    {
        self.cleanup();

        *self.shared.lock_callbacks() = Some(Callbacks {
            on_warning: Box::new(on_warning),
            on_expire: Box::new(on_expire),
        });

        let (shutdown_tx, _) = watch::channel(false);
        let handles = vec![
            tokio::spawn(run_idle_countdown(
                Arc::clone(&self.shared),
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(run_token_countdown(
                Arc::clone(&self.shared),
                shutdown_tx.subscribe(),
            )),
        ];

        *self.lock_timers() = Some(RunningTimers {
            shutdown_tx,
            handles,
        });
        info!("Session timers started");
    }

    /// Subscribe to warning/expiry events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Tracker feeding activity into this engine
    pub fn tracker(&self) -> ActivityTracker {
        ActivityTracker::attached(Arc::downgrade(&self.shared))
    }

    /// Reset the idle countdown (the user chose to continue)
    ///
    /// Has no effect on the token countdown. Returns `false` once expired.
    pub fn extend_session(&self) -> bool {
        self.shared.extend(Instant::now())
    }

    /// Record activity directly (touch handlers should prefer [`ActivityTracker`])
    pub fn record_activity(&self) -> bool {
        self.shared.record_activity(Instant::now())
    }

    /// Feed an app lifecycle transition
    pub fn handle_lifecycle(&self, event: LifecycleEvent) {
        self.shared.handle_lifecycle(event);
    }

    /// Expire the session immediately
    pub fn expire(&self, reason: LogoutReason) -> bool {
        self.shared.expire(reason)
    }

    /// Current session status
    pub fn security_status(&self) -> SecurityStatus {
        self.shared.status(Instant::now())
    }

    /// Check that stays valid after the engine is gone (then it reports false)
    pub fn liveness(&self) -> impl Fn() -> bool + Send + Sync + 'static {
        let shared = Arc::downgrade(&self.shared);
        move || {
            shared
                .upgrade()
                .is_some_and(|shared| shared.lock_session().state() != SessionState::Expired)
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.shared.lock_session().state()
    }

    /// Whether the countdown tasks are running
    pub fn is_running(&self) -> bool {
        self.lock_timers()
            .as_ref()
            .map(|timers| timers.handles.iter().any(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Stop both countdowns
    pub fn cleanup(&self) {
        if let Some(timers) = self.lock_timers().take() {
            let _ = timers.shutdown_tx.send(true);
            for handle in timers.handles {
                handle.abort();
            }
            debug!("Session timers stopped");
        }
    }

    fn lock_timers(&self) -> MutexGuard<'_, Option<RunningTimers>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionTimerEngine {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_idle_countdown(shared: Arc<EngineShared>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut wake_rx = shared.wake_tx.subscribe();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let (expired, deadline) = {
            let session = shared.lock_session();
            (session.is_expired(), session.next_idle_deadline())
        };
        if expired {
            break;
        }

        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    changed = wake_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        shared.evaluate(Instant::now(), LogoutReason::IdleTimeout);
                    }
                }
            }
            // Backgrounded: wait for the app to come back
            None => {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    changed = wake_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!("Idle countdown finished");
}

async fn run_token_countdown(shared: Arc<EngineShared>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut wake_rx = shared.wake_tx.subscribe();
    let deadline = shared.lock_session().token_expires_at();

    loop {
        if *shutdown_rx.borrow() || shared.lock_session().is_expired() {
            break;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => break,
            changed = wake_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Access token lifetime reached");
                shared.evaluate(Instant::now(), LogoutReason::TokenExpired);
                if !shared.lock_session().is_expired() {
                    // Evaluation raced a concurrent change; force it
                    shared.expire(LogoutReason::TokenExpired);
                }
                break;
            }
        }
    }

    debug!("Token countdown finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn config() -> SessionConfig {
        SessionConfig {
            idle_limit_secs: 300,
            warning_window_secs: 120,
            token_lifetime_secs: 3600,
            background_timeout_secs: 60,
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[derive(Default)]
    struct Recorder {
        warnings: AtomicUsize,
        expiries: Mutex<Vec<LogoutReason>>,
    }

    fn start(engine: &SessionTimerEngine) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        let on_warning = Arc::clone(&recorder);
        let on_expire = Arc::clone(&recorder);
        engine.initialize(
            move |_| {
                on_warning.warnings.fetch_add(1, Ordering::SeqCst);
            },
            move |reason| on_expire.expiries.lock().unwrap().push(reason),
        );
        recorder
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_warning_then_expiry() {
        let engine = SessionTimerEngine::new(config());
        let recorder = start(&engine);

        tokio::time::sleep(secs(179)).await;
        assert_eq!(engine.state(), SessionState::Active);

        tokio::time::sleep(secs(2)).await;
        assert_eq!(engine.state(), SessionState::Warned);
        assert_eq!(recorder.warnings.load(Ordering::SeqCst), 1);

        tokio::time::sleep(secs(120)).await;
        assert_eq!(engine.state(), SessionState::Expired);
        assert_eq!(*recorder.expiries.lock().unwrap(), vec![LogoutReason::IdleTimeout]);
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_session_restores_full_idle_budget() {
        let engine = SessionTimerEngine::new(config());
        let _recorder = start(&engine);

        tokio::time::sleep(secs(200)).await;
        assert_eq!(engine.state(), SessionState::Warned);
        let token_before = engine.security_status().token_remaining;

        assert!(engine.extend_session());
        let status = engine.security_status();
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.idle_remaining, secs(300));
        assert_eq!(status.token_remaining, token_before);

        tokio::time::sleep(secs(179)).await;
        assert_eq!(engine.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_keeps_session_alive_until_token_expiry() {
        let engine = SessionTimerEngine::new(config());
        let recorder = start(&engine);
        let tracker = engine.tracker();

        for _ in 0..59 {
            tokio::time::sleep(secs(60)).await;
            tracker.on_activity();
        }
        assert_eq!(engine.state(), SessionState::Active);
        assert_eq!(recorder.warnings.load(Ordering::SeqCst), 0);

        tokio::time::sleep(secs(61)).await;
        assert_eq!(engine.state(), SessionState::Expired);
        assert_eq!(*recorder.expiries.lock().unwrap(), vec![LogoutReason::TokenExpired]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_timeout_on_resume() {
        let engine = SessionTimerEngine::new(config());
        let recorder = start(&engine);

        tokio::time::sleep(secs(10)).await;
        engine.handle_lifecycle(LifecycleEvent::Background {
            at: Instant::now(),
        });

        // Idle countdown is suspended while away
        tokio::time::sleep(secs(400)).await;
        assert_eq!(engine.state(), SessionState::Active);

        engine.handle_lifecycle(LifecycleEvent::Foreground {
            at: Instant::now(),
        });
        let status = engine.security_status();
        assert_eq!(status.state, SessionState::Expired);
        assert_eq!(status.expiry_reason, Some(LogoutReason::BackgroundTimeout));
        assert_eq!(recorder.warnings.load(Ordering::SeqCst), 0);
        assert_eq!(*recorder.expiries.lock().unwrap(), vec![LogoutReason::BackgroundTimeout]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_warning_callback_expires_session() {
        let engine = SessionTimerEngine::new(config());
        let expiries = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&expiries);
        engine.initialize(
            |_| panic!("render failed"),
            move |reason| sink.lock().unwrap().push(reason),
        );

        tokio::time::sleep(secs(181)).await;
        let status = engine.security_status();
        assert_eq!(status.state, SessionState::Expired);
        assert_eq!(*expiries.lock().unwrap(), vec![LogoutReason::IdleTimeout]);

        let fault = status.fault.unwrap();
        assert!(fault.starts_with("Timer fault"));
        assert!(fault.contains("render failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_stops_countdowns() {
        let engine = SessionTimerEngine::new(config());
        let recorder = start(&engine);
        assert!(engine.is_running());

        engine.cleanup();
        tokio::time::sleep(secs(4000)).await;

        assert!(!engine.is_running());
        assert_eq!(recorder.warnings.load(Ordering::SeqCst), 0);
        assert!(recorder.expiries.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_broadcast() {
        let engine = SessionTimerEngine::new(config());
        let mut events = engine.subscribe();
        let _recorder = start(&engine);

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Warning {
                remaining: secs(120)
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Expired {
                reason: LogoutReason::IdleTimeout
            }
        );
    }

    #[test]
    fn test_liveness_follows_expiry() {
        let engine = SessionTimerEngine::new(config());
        let is_live = engine.liveness();
        assert!(is_live());

        engine.expire(LogoutReason::UserInitiated);
        assert!(!is_live());

        let other = SessionTimerEngine::new(config());
        let is_live = other.liveness();
        drop(other);
        assert!(!is_live());
    }

    #[test]
    fn test_remaining_formatted() {
        let status = SecurityStatus {
            state: SessionState::Warned,
            idle_remaining: secs(125),
            token_remaining: secs(1000),
            warning_shown: true,
            in_background: false,
            expiry_reason: None,
            fault: None,
        };
        assert_eq!(status.idle_remaining_formatted(), "02:05");
    }
}
