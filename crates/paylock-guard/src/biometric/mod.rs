//! Biometric capability and single-shot authentication
//!
//! The native dialog is reached through [`BiometricPlatform`]:
//! - iOS: LocalAuthentication (Face ID, Touch ID)
//! - Android: BiometricPrompt
//!
//! [`BiometricService`] caches what the device can do, issues one challenge per
//! call and owns the stored enablement profile.

mod service;

pub use service::BiometricService;

use async_trait::async_trait;
use paylock_core::{BiometricKind, BiometricPromptConfig, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How much the platform trusts the primary modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// Face/iris, or a fingerprint sensor the platform trusts for payments
    Strong,
    /// Anything else
    Weak,
}

/// What the device reported when queried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricCapability {
    /// Biometric hardware present
    pub supported: bool,
    /// At least one biometric enrolled
    pub enrolled: bool,
    /// Preferred modality, if any
    pub primary_type: Option<BiometricKind>,
    /// Every modality the hardware offers
    pub supported_kinds: Vec<BiometricKind>,
    pub security_level: SecurityLevel,
}

impl BiometricCapability {
    /// Capability of a device that cannot do biometrics (also used when queries fail)
    pub fn unavailable() -> Self {
        Self {
            supported: false,
            enrolled: false,
            primary_type: None,
            supported_kinds: Vec::new(),
            security_level: SecurityLevel::Weak,
        }
    }

    pub fn is_available(&self) -> bool {
        self.supported && self.enrolled
    }

    /// Whether `kind` can be used on this device right now
    pub fn supports(&self, kind: BiometricKind) -> bool {
        self.is_available() && self.supported_kinds.contains(&kind)
    }
}

/// Options passed to the native dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateOptions {
    pub prompt_message: String,
    pub cancel_label: String,
    pub fallback_label: String,
    /// Never let the OS substitute its own device passcode
    pub disable_device_fallback: bool,
}

impl From<&BiometricPromptConfig> for AuthenticateOptions {
    fn from(config: &BiometricPromptConfig) -> Self {
        Self {
            prompt_message: config.prompt.clone(),
            cancel_label: config.cancel_label.clone(),
            fallback_label: config.fallback_label.clone(),
            disable_device_fallback: true,
        }
    }
}

/// Raw result of the native dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeAuthResult {
    pub success: bool,
    /// Platform error code, e.g. `user_cancel`, `lockout`
    pub error: Option<String>,
}

impl NativeAuthResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn error(code: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(code.into()),
        }
    }
}

/// Why a biometric challenge did not succeed (cancellation excluded)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BiometricFailure {
    #[error("Biometric authentication not available on this device")]
    NotAvailable,

    #[error("No biometrics enrolled")]
    NotEnrolled,

    #[error("Biometric not recognized")]
    NotRecognized,

    #[error("User chose the fallback method")]
    FallbackRequested,

    #[error("Biometric authentication locked out")]
    Lockout,

    #[error("Biometric authentication timed out")]
    Timeout,

    #[error("Platform error: {0}")]
    Platform(String),
}

/// Outcome of exactly one biometric challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BiometricOutcome {
    Success,
    Cancelled,
    Failed(BiometricFailure),
}

impl BiometricOutcome {
    /// Map the native dialog result
    pub fn from_native(result: &NativeAuthResult) -> Self {
        if result.success {
            return BiometricOutcome::Success;
        }

        let failure = match result.error.as_deref() {
            Some("user_cancel") | Some("system_cancel") | Some("app_cancel") => {
                return BiometricOutcome::Cancelled;
            }
            Some("user_fallback") => BiometricFailure::FallbackRequested,
            Some("lockout") | Some("lockout_permanent") => BiometricFailure::Lockout,
            Some("not_enrolled") => BiometricFailure::NotEnrolled,
            Some("not_available") | Some("passcode_not_set") => BiometricFailure::NotAvailable,
            Some("timeout") => BiometricFailure::Timeout,
            Some("authentication_failed") | None => BiometricFailure::NotRecognized,
            Some(other) => BiometricFailure::Platform(other.to_string()),
        };
        BiometricOutcome::Failed(failure)
    }
}

/// Stored enablement for this device (single slot)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBiometricProfile {
    /// Account the profile belongs to
    pub identifier: String,
    pub enabled: bool,
    pub biometric_type: BiometricKind,
    /// Installation the profile was created on
    pub device_id: String,
}

/// Native biometric facilities of the host platform
#[async_trait]
pub trait BiometricPlatform: Send + Sync {
    /// Whether biometric hardware is present
    async fn has_hardware(&self) -> Result<bool>;

    /// Whether at least one biometric is enrolled
    async fn is_enrolled(&self) -> Result<bool>;

    /// Modalities the hardware supports
    async fn supported_kinds(&self) -> Result<Vec<BiometricKind>>;

    /// Whether the platform classes its fingerprint sensor as strong
    fn trusts_fingerprint(&self) -> bool {
        false
    }

    /// Show the native dialog once
    async fn authenticate(&self, options: &AuthenticateOptions) -> Result<NativeAuthResult>;
}
