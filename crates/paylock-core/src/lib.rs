//! Paylock core - shared types for session security and payment authorization
//!
//! This crate provides the pieces every other Paylock crate builds on:
//! - Domain types (logout reasons, pending transactions, biometric kinds)
//! - The error taxonomy
//! - The credential store contract and reference stores
//! - Guard configuration and tracing bootstrap

pub mod config;
pub mod error;
pub mod logging;
pub mod store;
pub mod types;

pub use config::{BiometricPromptConfig, GuardConfig, PinPolicy, SessionConfig};
pub use error::{Error, Result};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use types::{Amount, BiometricKind, LogoutReason, PendingTransaction, TransactionId};
