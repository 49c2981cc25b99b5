//! Guard configuration
//!
//! Timeouts, prompt text and PIN policy. Durations are persisted as whole
//! seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration file name
const CONFIG_FILE_NAME: &str = "guard.json";

/// Configuration directory under the platform config dir
const CONFIG_DIR_NAME: &str = "paylock";

/// Session timeout configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time before forced logout
    pub idle_limit_secs: u64,
    /// How long before the idle limit the warning is raised
    pub warning_window_secs: u64,
    /// Absolute lifetime of the access token (never reset by activity)
    pub token_lifetime_secs: u64,
    /// Longest tolerated stay in the background
    pub background_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_limit_secs: 300,          // 5 minutes
            warning_window_secs: 120,      // 2 minute warning
            token_lifetime_secs: 3600,     // 1 hour
            background_timeout_secs: 120,  // 2 minutes
        }
    }
}

impl SessionConfig {
    /// Stricter limits for high-risk accounts
    pub fn strict() -> Self {
        Self {
            idle_limit_secs: 120,
            warning_window_secs: 30,
            token_lifetime_secs: 1800,
            background_timeout_secs: 30,
        }
    }

    /// Lenient limits for local development
    pub fn development() -> Self {
        Self {
            idle_limit_secs: 1800,
            warning_window_secs: 300,
            token_lifetime_secs: 14400,
            background_timeout_secs: 1800,
        }
    }

    pub fn idle_limit(&self) -> Duration {
        Duration::from_secs(self.idle_limit_secs)
    }

    pub fn warning_window(&self) -> Duration {
        Duration::from_secs(self.warning_window_secs)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    pub fn background_timeout(&self) -> Duration {
        Duration::from_secs(self.background_timeout_secs)
    }

    /// Idle time after which the warning is raised
    pub fn warning_threshold(&self) -> Duration {
        self.idle_limit().saturating_sub(self.warning_window())
    }

    /// Check the limits are internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.idle_limit_secs == 0 {
            return Err(Error::InvalidConfig("idle limit must be non-zero".into()));
        }
        if self.warning_window_secs >= self.idle_limit_secs {
            return Err(Error::InvalidConfig(format!(
                "warning window ({}s) must be shorter than idle limit ({}s)",
                self.warning_window_secs, self.idle_limit_secs
            )));
        }
        if self.token_lifetime_secs == 0 {
            return Err(Error::InvalidConfig("token lifetime must be non-zero".into()));
        }
        if self.background_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "background timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Text shown on the native biometric prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricPromptConfig {
    /// Prompt message
    pub prompt: String,
    /// Label of the cancel button
    pub cancel_label: String,
    /// Label of the fallback button (PIN)
    pub fallback_label: String,
}

impl Default for BiometricPromptConfig {
    fn default() -> Self {
        Self {
            prompt: "Confirm payment".to_string(),
            cancel_label: "Cancel".to_string(),
            fallback_label: "Use PIN".to_string(),
        }
    }
}

/// PIN format policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinPolicy {
    /// Exact number of digits
    pub length: usize,
}

impl Default for PinPolicy {
    fn default() -> Self {
        Self { length: 4 }
    }
}

/// Top-level configuration for the security guard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub biometric: BiometricPromptConfig,

    #[serde(default)]
    pub pin: PinPolicy,
}

impl GuardConfig {
    /// Strict preset
    pub fn strict() -> Self {
        Self {
            session: SessionConfig::strict(),
            ..Default::default()
        }
    }

    /// Development preset
    pub fn development() -> Self {
        Self {
            session: SessionConfig::development(),
            ..Default::default()
        }
    }

    /// Default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when missing or unreadable
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load guard config, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;

        tracing::debug!("Saved guard config to {:?}", path);
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        if self.pin.length != 4 {
            return Err(Error::InvalidConfig(format!(
                "unsupported PIN length {}",
                self.pin.length
            )));
        }
        Ok(())
    }
}
