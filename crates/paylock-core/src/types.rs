//! Shared domain types for session security and transaction authorization

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Why the user was signed out
///
/// Exactly one reason is persisted at a time; it drives the banner shown on the
/// next launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogoutReason {
    /// The user pressed "log out"
    UserInitiated,
    /// No activity for the configured idle limit
    IdleTimeout,
    /// The access token reached its absolute lifetime
    TokenExpired,
    /// The app stayed in the background past its budget
    BackgroundTimeout,
    /// Device biometrics changed under an enabled profile
    BiometricChanged,
}

impl LogoutReason {
    /// All reasons, in declaration order
    pub const ALL: [LogoutReason; 5] = [
        LogoutReason::UserInitiated,
        LogoutReason::IdleTimeout,
        LogoutReason::TokenExpired,
        LogoutReason::BackgroundTimeout,
        LogoutReason::BiometricChanged,
    ];

    /// Stable string form used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutReason::UserInitiated => "UserInitiated",
            LogoutReason::IdleTimeout => "IdleTimeout",
            LogoutReason::TokenExpired => "TokenExpired",
            LogoutReason::BackgroundTimeout => "BackgroundTimeout",
            LogoutReason::BiometricChanged => "BiometricChanged",
        }
    }

    /// Whether the logout was forced on the user
    pub fn is_forced(&self) -> bool {
        !matches!(self, LogoutReason::UserInitiated)
    }

    /// Banner text for the next launch, if one should be shown
    pub fn banner_message(&self) -> Option<&'static str> {
        match self {
            LogoutReason::UserInitiated => None,
            LogoutReason::IdleTimeout => {
                Some("You were logged out after a period of inactivity.")
            }
            LogoutReason::TokenExpired => Some("Your session has expired. Please log in again."),
            LogoutReason::BackgroundTimeout => {
                Some("You were logged out because the app was in the background too long.")
            }
            LogoutReason::BiometricChanged => Some(
                "Biometric settings on this device changed. Please log in and re-enable biometrics.",
            ),
        }
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogoutReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LogoutReason::ALL
            .iter()
            .copied()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| Error::Serialization(format!("unknown logout reason: {}", s)))
    }
}

/// Biometric modality reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BiometricKind {
    /// Fingerprint (Touch ID, fingerprint scanner)
    Fingerprint,
    /// Face recognition (Face ID, face unlock)
    Face,
    /// Iris scan
    Iris,
}

impl BiometricKind {
    /// Face and iris are always considered strong; fingerprint depends on the platform
    pub fn is_inherently_strong(&self) -> bool {
        matches!(self, BiometricKind::Face | BiometricKind::Iris)
    }

    /// User-facing label
    pub fn label(&self) -> &'static str {
        match self {
            BiometricKind::Fingerprint => "Fingerprint",
            BiometricKind::Face => "Face ID",
            BiometricKind::Iris => "Iris",
        }
    }
}

impl fmt::Display for BiometricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BiometricKind {
    type Err = Error;

    /// Accepts both platform marketing names and plain modality names
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fingerprint" | "touch id" | "touchid" => Ok(BiometricKind::Fingerprint),
            "face" | "face id" | "faceid" | "facial" | "face unlock" => Ok(BiometricKind::Face),
            "iris" => Ok(BiometricKind::Iris),
            other => Err(Error::Serialization(format!(
                "unknown biometric type: {}",
                other
            ))),
        }
    }
}

/// Unique identifier of a pending transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form for logs
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monetary amount in minor currency units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(u64);

impl Amount {
    /// Create an amount from minor units (cents)
    pub fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Raw minor units
    pub fn minor(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// A monetary action awaiting authorization before submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    /// Transaction identifier
    pub id: TransactionId,
    /// Amount to be moved
    pub amount: Amount,
    /// What the user is paying for (shown in the prompt)
    pub payload_description: String,
    /// When the user submitted the action
    pub created_at: DateTime<Utc>,
}

impl PendingTransaction {
    /// Create a new pending transaction stamped with the current time
    pub fn new(amount: Amount, payload_description: impl Into<String>) -> Self {
        Self {
            id: TransactionId::new(),
            amount,
            payload_description: payload_description.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logout_reason_string_round_trip() {
        for reason in LogoutReason::ALL {
            let parsed: LogoutReason = reason.as_str().parse().unwrap();
            assert_eq!(parsed, reason);
        }
        assert_eq!(LogoutReason::IdleTimeout.to_string(), "IdleTimeout");
        assert!("Bogus".parse::<LogoutReason>().is_err());
    }

    #[test]
    fn test_banner_only_for_forced_logouts() {
        assert!(LogoutReason::UserInitiated.banner_message().is_none());
        for reason in LogoutReason::ALL.iter().filter(|r| r.is_forced()) {
            assert!(reason.banner_message().is_some(), "{} has no banner", reason);
        }
    }

    #[test]
    fn test_biometric_kind_labels() {
        assert_eq!("Face ID".parse::<BiometricKind>().unwrap(), BiometricKind::Face);
        assert_eq!("Touch ID".parse::<BiometricKind>().unwrap(), BiometricKind::Fingerprint);
        assert_eq!("iris".parse::<BiometricKind>().unwrap(), BiometricKind::Iris);
        assert!("voice".parse::<BiometricKind>().is_err());

        assert!(BiometricKind::Face.is_inherently_strong());
        assert!(!BiometricKind::Fingerprint.is_inherently_strong());
    }

    #[test]
    fn test_amount_display() {
        assert_eq!(Amount::from_minor(12345).to_string(), "123.45");
        assert_eq!(Amount::from_minor(7).to_string(), "0.07");
    }

    #[test]
    fn test_transaction_ids_are_unique() {
        let a = PendingTransaction::new(Amount::from_minor(100), "Electricity bill");
        let b = PendingTransaction::new(Amount::from_minor(100), "Electricity bill");
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.short().len(), 8);
    }

    #[test]
    fn test_pending_transaction_survives_json() {
        let transaction = PendingTransaction::new(Amount::from_minor(4_200), "Gas bill");
        let json = serde_json::to_string(&transaction).unwrap();
        let back: PendingTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, transaction);
    }
}
