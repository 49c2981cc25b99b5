//! Transaction authorization
//!
//! A pending payment is authorized with one biometric challenge when the user
//! has biometrics enabled, falling back to PIN entry verified by the backend.
//! Each call resolves to exactly one [`AuthorizationOutcome`].

mod orchestrator;
mod pin;

pub use orchestrator::{
    AuthorizationAttempt, AuthorizationMethod, AuthorizationOutcome, CompletionHandler,
    TransactionAuthorizer,
};
pub use pin::{Pin, PinEntry, PinInput, PinPrompt, PinStatus, PinVerification, PinVerifier};
