//! Biometric capability service

use std::sync::Arc;

use paylock_core::store::{self, keys};
use paylock_core::{BiometricKind, BiometricPromptConfig, CredentialStore, Error, Result};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AuthenticateOptions, BiometricCapability, BiometricFailure, BiometricOutcome,
    BiometricPlatform, SecurityLevel, StoredBiometricProfile,
};

/// Preference order when the device supports several modalities
const KIND_PREFERENCE: [BiometricKind; 3] =
    [BiometricKind::Face, BiometricKind::Iris, BiometricKind::Fingerprint];

/// Caches device capability and owns the stored biometric profile
pub struct BiometricService {
    platform: Arc<dyn BiometricPlatform>,
    store: Arc<dyn CredentialStore>,
    capability: RwLock<Option<BiometricCapability>>,
}

impl BiometricService {
    pub fn new(platform: Arc<dyn BiometricPlatform>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            platform,
            store,
            capability: RwLock::new(None),
        }
    }

    /// Query the device and replace the cached capability
    ///
    /// Query errors yield an unavailable capability instead of an error, so
    /// callers always keep the PIN path.
    pub async fn initialize(&self) -> BiometricCapability {
        let capability = match self.query_device().await {
            Ok(capability) => capability,
            Err(e) => {
                warn!("Biometric capability query failed, treating as unavailable: {}", e);
                BiometricCapability::unavailable()
            }
        };

        debug!(
            "Biometric capability: supported={} enrolled={} type={:?} level={:?}",
            capability.supported,
            capability.enrolled,
            capability.primary_type,
            capability.security_level
        );
        *self.capability.write().await = Some(capability.clone());
        capability
    }

    async fn query_device(&self) -> Result<BiometricCapability> {
        let supported = self.platform.has_hardware().await?;
        if !supported {
            return Ok(BiometricCapability::unavailable());
        }

        let enrolled = self.platform.is_enrolled().await?;
        let kinds = self.platform.supported_kinds().await?;
        let primary_type = KIND_PREFERENCE
            .iter()
            .copied()
            .find(|kind| kinds.contains(kind));

        let strong = kinds.iter().any(|kind| {
            kind.is_inherently_strong()
                || (*kind == BiometricKind::Fingerprint && self.platform.trusts_fingerprint())
        });

        Ok(BiometricCapability {
            supported,
            enrolled,
            primary_type,
            supported_kinds: kinds,
            security_level: if strong {
                SecurityLevel::Strong
            } else {
                SecurityLevel::Weak
            },
        })
    }

    /// Cached capability, querying the device on first use
    pub async fn capability(&self) -> BiometricCapability {
        if let Some(capability) = self.capability.read().await.as_ref() {
            return capability.clone();
        }
        self.initialize().await
    }

    /// Hardware present and biometrics enrolled
    pub async fn is_available(&self) -> bool {
        self.capability().await.is_available()
    }

    /// Issue exactly one native challenge
    pub async fn authenticate(
        &self,
        prompt: &str,
        cancel_label: &str,
        fallback_label: &str,
    ) -> BiometricOutcome {
        let options = AuthenticateOptions {
            prompt_message: prompt.to_string(),
            cancel_label: cancel_label.to_string(),
            fallback_label: fallback_label.to_string(),
            disable_device_fallback: true,
        };
        self.challenge(&options).await
    }

    /// [`authenticate`](Self::authenticate) with configured prompt text
    pub async fn authenticate_with(&self, config: &BiometricPromptConfig) -> BiometricOutcome {
        self.challenge(&AuthenticateOptions::from(config)).await
    }

    async fn challenge(&self, options: &AuthenticateOptions) -> BiometricOutcome {
        if !self.is_available().await {
            return BiometricOutcome::Failed(BiometricFailure::NotAvailable);
        }

        let outcome = match self.platform.authenticate(options).await {
            Ok(result) => BiometricOutcome::from_native(&result),
            Err(e) => BiometricOutcome::Failed(BiometricFailure::Platform(e.to_string())),
        };
        debug!("Biometric challenge finished: {:?}", outcome);
        outcome
    }

    /// Enable biometrics for `identifier` on this device
    pub async fn enable_for_identifier(
        &self,
        identifier: &str,
        biometric_type: BiometricKind,
    ) -> Result<StoredBiometricProfile> {
        let capability = self.capability().await;
        if !capability.is_available() {
            return Err(Error::ConfigurationMissing(
                "biometrics are not available on this device".into(),
            ));
        }
        if !capability.supports(biometric_type) {
            return Err(Error::ConfigurationMissing(format!(
                "{} is not supported on this device",
                biometric_type
            )));
        }

        let profile = StoredBiometricProfile {
            identifier: identifier.to_string(),
            enabled: true,
            biometric_type,
            device_id: self.device_id().await?,
        };
        store::save_record(self.store.as_ref(), keys::BIOMETRIC_PROFILE, &profile).await?;

        info!("Enabled {} for {}", biometric_type, identifier);
        Ok(profile)
    }

    /// Remove the stored profile
    pub async fn disable(&self) -> Result<()> {
        self.store.delete(keys::BIOMETRIC_PROFILE).await?;
        info!("Biometric authentication disabled");
        Ok(())
    }

    /// Stored profile, `None` when absent or unreadable
    pub async fn stored_profile(&self) -> Option<StoredBiometricProfile> {
        match store::load_record(self.store.as_ref(), keys::BIOMETRIC_PROFILE).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Failed to read biometric profile: {}", e);
                None
            }
        }
    }

    /// Whether the stored profile enables biometrics for `identifier` on this device
    pub async fn is_biometric_enabled_for_user(&self, identifier: &str) -> bool {
        let Some(profile) = self.stored_profile().await else {
            return false;
        };
        if !profile.enabled || profile.identifier != identifier {
            return false;
        }

        match self.existing_device_id().await {
            Some(device_id) => device_id == profile.device_id,
            None => false,
        }
    }

    /// Whether the device no longer matches an enabled profile
    ///
    /// Re-queries the device. True when biometrics were removed or the stored
    /// modality is no longer offered.
    pub async fn enrollment_changed(&self) -> bool {
        let Some(profile) = self.stored_profile().await else {
            return false;
        };
        if !profile.enabled {
            return false;
        }

        let capability = self.initialize().await;
        let changed = !capability.supports(profile.biometric_type);
        if changed {
            warn!(
                "Biometric enrollment changed for {} (stored {}, device {:?})",
                profile.identifier, profile.biometric_type, capability.supported_kinds
            );
        }
        changed
    }

    async fn existing_device_id(&self) -> Option<String> {
        match self.store.get(keys::DEVICE_ID).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to read device id: {}", e);
                None
            }
        }
    }

    async fn device_id(&self) -> Result<String> {
        if let Some(id) = self.store.get(keys::DEVICE_ID).await? {
            return Ok(id);
        }
        let id = Uuid::new_v4().to_string();
        self.store.set(keys::DEVICE_ID, &id).await?;
        Ok(id)
    }
}
