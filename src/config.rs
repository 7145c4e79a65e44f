use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub revocation: RevocationConfig,
    pub registry_gate: RegistryGateConfig,
    pub scanner: ScannerConfig,
    pub renewal: RenewalConfig,
    pub rotation: RotationConfig,
}

/// Location of the revocation list snapshot in the blob store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationConfig {
    pub bucket: String,
    pub key: String,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            bucket: "fleetcert-revocation".to_string(),
            key: "crl.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryGateConfig {
    pub strategy: GateStrategy,
}

/// Whitelist strategy selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GateStrategy {
    #[default]
    DeviceRegistry,
    IdentityService,
    AllowAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Audit check name whose findings identify expiring certificates.
    pub expiring_check_name: String,
    pub queue_url: String,
    /// Findings per page; also the batch unit for fan-out messages.
    pub page_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            expiring_check_name: "DEVICE_CERTIFICATE_EXPIRING_CHECK".to_string(),
            queue_url: "fleetcert-renewal".to_string(),
            page_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewalConfig {
    /// Bucket receiving date-partitioned PEM archives of replacement
    /// certificates.
    pub archive_bucket: String,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            archive_bucket: "fleetcert-archive".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Channel prefix for successful rotation responses; the device id is
    /// appended as the final segment.
    pub accepted_channel_prefix: String,
    pub rejected_channel_prefix: String,
    /// When set, an acknowledged predecessor certificate is deleted after
    /// deactivation instead of being kept inactive.
    pub delete_replaced_certificates: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            accepted_channel_prefix: "fleetcert/rotation/accepted".to_string(),
            rejected_channel_prefix: "fleetcert/rotation/rejected".to_string(),
            delete_replaced_certificates: false,
        }
    }
}

impl RotationConfig {
    pub fn accepted_channel(&self, device_id: &str) -> String {
        format!("{}/{}", self.accepted_channel_prefix, device_id)
    }

    pub fn rejected_channel(&self, device_id: &str) -> String {
        format!("{}/{}", self.rejected_channel_prefix, device_id)
    }
}

impl Config {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::error::FleetCertError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.revocation.bucket.is_empty() || self.revocation.key.is_empty() {
            return Err(crate::error::FleetCertError::InvalidConfig(
                "revocation.bucket and revocation.key cannot be empty".to_string(),
            ));
        }

        if self.scanner.expiring_check_name.is_empty() {
            return Err(crate::error::FleetCertError::InvalidConfig(
                "scanner.expiring_check_name cannot be empty".to_string(),
            ));
        }

        if self.scanner.queue_url.is_empty() {
            return Err(crate::error::FleetCertError::InvalidConfig(
                "scanner.queue_url cannot be empty".to_string(),
            ));
        }

        if self.scanner.page_size == 0 {
            return Err(crate::error::FleetCertError::InvalidConfig(
                "scanner.page_size must be greater than 0".to_string(),
            ));
        }

        if self.renewal.archive_bucket.is_empty() {
            return Err(crate::error::FleetCertError::InvalidConfig(
                "renewal.archive_bucket cannot be empty".to_string(),
            ));
        }

        if self.rotation.accepted_channel_prefix.is_empty()
            || self.rotation.rejected_channel_prefix.is_empty()
        {
            return Err(crate::error::FleetCertError::InvalidConfig(
                "rotation channel prefixes cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
