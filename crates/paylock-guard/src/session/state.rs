//! Security session state machine
//!
//! Pure bookkeeping: every method takes the current instant explicitly, so the
//! timer engine decides *when* to evaluate and this type decides *what*
//! happens. States only move forward (Active -> Warned -> Expired); the single
//! way back is an explicit continuation from Warned.

use std::time::Duration;

use paylock_core::{LogoutReason, SessionConfig};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Session in use
    Active,
    /// Idle warning raised, waiting for the user to continue
    Warned,
    /// Session is over; a forced logout follows
    Expired,
}

/// Transition produced by an evaluation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    /// Idle warning raised
    Warned {
        /// Idle time left before expiry
        remaining: Duration,
    },
    /// Session expired
    Expired(LogoutReason),
}

/// Authenticated session timing state
#[derive(Debug, Clone)]
pub struct SecuritySession {
    config: SessionConfig,
    session_started_at: Instant,
    last_activity_at: Instant,
    token_expires_at: Instant,
    idle_warning_shown: bool,
    state: SessionState,
    background_since: Option<Instant>,
    expiry_reason: Option<LogoutReason>,
}

impl SecuritySession {
    /// Start a fresh session at login
    pub fn start(config: SessionConfig, now: Instant) -> Self {
        let token_expires_at = now + config.token_lifetime();
        Self {
            config,
            session_started_at: now,
            last_activity_at: now,
            token_expires_at,
            idle_warning_shown: false,
            state: SessionState::Active,
            background_since: None,
            expiry_reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_started_at(&self) -> Instant {
        self.session_started_at
    }

    pub fn last_activity_at(&self) -> Instant {
        self.last_activity_at
    }

    pub fn token_expires_at(&self) -> Instant {
        self.token_expires_at
    }

    pub fn idle_warning_shown(&self) -> bool {
        self.idle_warning_shown
    }

    pub fn expiry_reason(&self) -> Option<LogoutReason> {
        self.expiry_reason
    }

    pub fn is_expired(&self) -> bool {
        self.state == SessionState::Expired
    }

    pub fn is_backgrounded(&self) -> bool {
        self.background_since.is_some()
    }

    /// Time since the last recorded activity
    pub fn idle_elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity_at)
    }

    /// Idle time left before expiry
    pub fn idle_remaining(&self, now: Instant) -> Duration {
        if self.is_expired() {
            return Duration::ZERO;
        }
        self.config.idle_limit().saturating_sub(self.idle_elapsed(now))
    }

    /// Token lifetime left (independent of activity)
    pub fn token_remaining(&self, now: Instant) -> Duration {
        if self.is_expired() {
            return Duration::ZERO;
        }
        self.token_expires_at.saturating_duration_since(now)
    }

    /// Next instant at which the idle countdown needs evaluating
    ///
    /// `None` while backgrounded (the countdown is suspended) or once expired.
    pub fn next_idle_deadline(&self) -> Option<Instant> {
        if self.is_expired() || self.is_backgrounded() {
            return None;
        }
        let offset = match self.state {
            SessionState::Active if !self.idle_warning_shown => self.config.warning_threshold(),
            _ => self.config.idle_limit(),
        };
        Some(self.last_activity_at + offset)
    }

    /// Record user activity
    ///
    /// Ignored once a warning is pending (the user must confirm continuation),
    /// while backgrounded, or after expiry. Returns whether the idle clock moved.
    pub fn record_activity(&mut self, now: Instant) -> bool {
        if self.state != SessionState::Active || self.is_backgrounded() {
            return false;
        }
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
        true
    }

    /// Confirm continuation: restore the full idle budget
    ///
    /// The token expiry is untouched.
    pub fn extend(&mut self, now: Instant) -> bool {
        if self.is_expired() {
            return false;
        }
        self.last_activity_at = now;
        self.idle_warning_shown = false;
        self.state = SessionState::Active;
        true
    }

    /// Evaluate both countdowns at `now`
    pub fn evaluate(&mut self, now: Instant) -> Option<SessionTransition> {
        if self.is_expired() {
            return None;
        }

        let token_elapsed = now >= self.token_expires_at;
        let idle_expires_at = self.last_activity_at + self.config.idle_limit();
        let idle_elapsed = !self.is_backgrounded() && now >= idle_expires_at;

        // Whichever deadline passed first wins
        match (idle_elapsed, token_elapsed) {
            (true, true) if idle_expires_at < self.token_expires_at => {
                return self.expire(LogoutReason::IdleTimeout);
            }
            (_, true) => return self.expire(LogoutReason::TokenExpired),
            (true, false) => return self.expire(LogoutReason::IdleTimeout),
            (false, false) => {}
        }

        if self.state == SessionState::Active
            && !self.idle_warning_shown
            && !self.is_backgrounded()
            && self.idle_elapsed(now) >= self.config.warning_threshold()
        {
            self.state = SessionState::Warned;
            self.idle_warning_shown = true;
            return Some(SessionTransition::Warned {
                remaining: self.idle_remaining(now),
            });
        }

        None
    }

    /// App moved to the background
    pub fn enter_background(&mut self, now: Instant) {
        if self.is_expired() || self.is_backgrounded() {
            return;
        }
        self.background_since = Some(now);
    }

    /// App returned to the foreground
    ///
    /// Too long in the background expires the session directly, skipping the
    /// warning stage. Otherwise the resume counts as activity; a pending
    /// warning keeps the idle time it had when the app left.
    pub fn resume(&mut self, now: Instant) -> Option<SessionTransition> {
        let since = self.background_since.take()?;
        if self.is_expired() {
            return None;
        }

        let away = now.saturating_duration_since(since);
        if away > self.config.background_timeout() {
            return self.expire(LogoutReason::BackgroundTimeout);
        }
        if now >= self.token_expires_at {
            return self.expire(LogoutReason::TokenExpired);
        }

        match self.state {
            SessionState::Active => self.last_activity_at = now,
            SessionState::Warned => self.last_activity_at += away,
            SessionState::Expired => {}
        }
        self.evaluate(now)
    }

    /// Force expiry with `reason`; no-op if already expired
    pub fn expire(&mut self, reason: LogoutReason) -> Option<SessionTransition> {
        if self.is_expired() {
            return None;
        }
        self.state = SessionState::Expired;
        self.expiry_reason = Some(reason);
        self.background_since = None;
        Some(SessionTransition::Expired(reason))
    }
}
