//! PIN entry and verification contracts

use std::fmt;

use async_trait::async_trait;
use paylock_core::{Amount, Error, PinPolicy, Result, TransactionId};
use zeroize::Zeroizing;

/// A well-formed PIN ready for verification
///
/// Digits are wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct Pin(Zeroizing<String>);

impl Pin {
    /// Check the format locally before any remote call
    pub fn parse(input: &str, policy: &PinPolicy) -> Result<Self> {
        let input = input.trim();
        if input.len() != policy.length || !input.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidPin(policy.length));
        }
        Ok(Self(Zeroizing::new(input.to_string())))
    }

    /// The digits, for handing to a verifier
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(****)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinStatus {
    Success,
    Failure,
}

/// Result of a remote PIN check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinVerification {
    pub status: PinStatus,
    /// Server-provided message, shown inline on failure
    pub message: Option<String>,
}

impl PinVerification {
    pub fn success() -> Self {
        Self {
            status: PinStatus::Success,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: PinStatus::Failure,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PinStatus::Success
    }
}

/// Remote PIN check
#[async_trait]
pub trait PinVerifier: Send + Sync {
    /// Whether the account has a PIN set up
    async fn is_configured(&self) -> Result<bool>;

    /// Check a PIN against the backend
    async fn verify(&self, pin: &Pin) -> Result<PinVerification>;
}

/// What the PIN screen shows for one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinPrompt {
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub description: String,
    /// 1-based entry number
    pub attempt: u32,
    /// Inline error from the previous entry
    pub error: Option<String>,
}

/// What the user did on the PIN screen
pub enum PinInput {
    Entered(Zeroizing<String>),
    Cancelled,
}

impl PinInput {
    pub fn entered(digits: &str) -> Self {
        PinInput::Entered(Zeroizing::new(digits.to_string()))
    }
}

impl fmt::Debug for PinInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinInput::Entered(_) => f.write_str("Entered(****)"),
            PinInput::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// UI collaborator that collects a PIN
#[async_trait]
pub trait PinEntry: Send + Sync {
    async fn request_pin(&self, prompt: &PinPrompt) -> PinInput;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1234")]
    #[case(" 0000 ")]
    fn test_valid_pin(#[case] input: &str) {
        let pin = Pin::parse(input, &PinPolicy::default()).unwrap();
        assert_eq!(pin.expose().len(), 4);
    }

    #[rstest]
    #[case("")]
    #[case("123")]
    #[case("12345")]
    #[case("12a4")]
    #[case("١٢٣٤")]
    fn test_malformed_pin(#[case] input: &str) {
        assert!(matches!(
            Pin::parse(input, &PinPolicy::default()),
            Err(Error::InvalidPin(4))
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        let pin = Pin::parse("4821", &PinPolicy::default()).unwrap();
        assert!(!format!("{:?}", pin).contains("4821"));
        assert!(!format!("{:?}", PinInput::entered("4821")).contains("4821"));
    }
}
