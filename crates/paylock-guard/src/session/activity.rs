//! Side-channel activity observer
//!
//! Touch handlers call into the tracker on every touch-start. The tracker never
//! claims the gesture: it records activity and always answers "do not capture",
//! so scrolling and swiping behave as if it were not there.

use std::sync::Weak;

use tokio::time::Instant;

use super::engine::EngineShared;
use super::LifecycleEvent;

/// Feeds user activity into the session engine without consuming input
///
/// Holds only a weak reference: once the session's engine is gone, every call
/// is a no-op.
#[derive(Clone, Default)]
pub struct ActivityTracker {
    target: Weak<EngineShared>,
}

impl ActivityTracker {
    pub(crate) fn attached(target: Weak<EngineShared>) -> Self {
        Self { target }
    }

    /// A tracker with no session behind it
    pub fn detached() -> Self {
        Self::default()
    }

    /// Whether a live session is behind this tracker
    pub fn is_attached(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Record activity; non-blocking and idempotent
    pub fn on_activity(&self) {
        if let Some(engine) = self.target.upgrade() {
            engine.record_activity(Instant::now());
        }
    }

    /// Touch-start hook
    ///
    /// Returns whether the touch should be captured, which is never.
    pub fn on_touch_start(&self) -> bool {
        self.on_activity();
        false
    }

    /// Forward an app lifecycle transition (foreground counts as activity)
    pub fn on_lifecycle(&self, event: LifecycleEvent) {
        if let Some(engine) = self.target.upgrade() {
            engine.handle_lifecycle(event);
        }
    }
}

impl std::fmt::Debug for ActivityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityTracker")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionState, SessionTimerEngine};
    use paylock_core::SessionConfig;
    use std::time::Duration;

    #[test]
    fn test_detached_tracker_is_noop() {
        let tracker = ActivityTracker::detached();
        assert!(!tracker.is_attached());
        tracker.on_activity();
        assert!(!tracker.on_touch_start());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_idle_without_capturing() {
        let engine = SessionTimerEngine::new(SessionConfig::default());
        let tracker = engine.tracker();

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(!tracker.on_touch_start());
        assert_eq!(
            engine.security_status().idle_remaining,
            SessionConfig::default().idle_limit()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_activity_is_idempotent() {
        let engine = SessionTimerEngine::new(SessionConfig::default());
        let tracker = engine.tracker();

        tokio::time::sleep(Duration::from_secs(30)).await;
        tracker.on_activity();
        tracker.on_activity();
        tracker.on_activity();

        let status = engine.security_status();
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.idle_remaining, SessionConfig::default().idle_limit());
    }

    #[test]
    fn test_tracker_detaches_when_engine_dropped() {
        let engine = SessionTimerEngine::new(SessionConfig::default());
        let tracker = engine.tracker();
        assert!(tracker.is_attached());

        drop(engine);
        assert!(!tracker.is_attached());
        tracker.on_activity();
    }
}
