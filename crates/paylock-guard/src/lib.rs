//! Paylock guard - session security and payment authorization
//!
//! This crate enforces the security of one authenticated session:
//! - Idle, token and background timeouts with forced logout
//! - Biometric capability detection and single-shot challenges
//! - Biometric -> PIN authorization of pending transactions
//!
//! [`SecurityContext`] ties these together for a single login.

pub mod authorize;
pub mod biometric;
pub mod context;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use authorize::{AuthorizationMethod, AuthorizationOutcome, TransactionAuthorizer};
pub use biometric::{BiometricCapability, BiometricOutcome, BiometricService};
pub use context::{Collaborators, SecurityContext};
pub use session::{
    ActivityTracker, ForcedLogoutCoordinator, LifecycleEvent, SecurityStatus, SessionState,
    SessionTimerEngine,
};
