//! Session security: idle and token timeouts, activity, forced logout
//!
//! # Model
//!
//! - A [`SecuritySession`] holds the timing state of one login
//! - The [`SessionTimerEngine`] runs the idle and token countdowns over it
//! - The [`ActivityTracker`] feeds touches and foreground transitions in
//! - The [`ForcedLogoutCoordinator`] persists why the user was signed out

mod activity;
mod engine;
mod logout;
mod state;

pub use activity::ActivityTracker;
pub use engine::{SecurityStatus, SessionEvent, SessionTimerEngine};
pub use logout::{ForcedLogoutCoordinator, SignOut};
pub use state::{SecuritySession, SessionState, SessionTransition};

use tokio::time::Instant;

/// App lifecycle transition reported by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// App moved to the background
    Background { at: Instant },
    /// App returned to the foreground
    Foreground { at: Instant },
}

impl LifecycleEvent {
    /// Background transition stamped now
    pub fn background_now() -> Self {
        LifecycleEvent::Background { at: Instant::now() }
    }

    /// Foreground transition stamped now
    pub fn foreground_now() -> Self {
        LifecycleEvent::Foreground { at: Instant::now() }
    }
}
