//! Registry gate: the whitelist capability consulted before a device
//! identity is trusted.
//!
//! Three interchangeable strategies are selected by configuration at
//! startup: delegate to the managed device registry, delegate to an
//! external device-identity registry, or allow everything (lab fleets).

use crate::clients::{DeviceRegistry, IdentityService};
use crate::config::{GateStrategy, RegistryGateConfig};
use crate::types::{DevicePatch, DeviceStatus};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait RegistryGate: Send + Sync {
    async fn is_whitelisted(&self, device_id: &str) -> Result<bool>;
    async fn update_asset_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        identity_arn: Option<&str>,
    ) -> Result<()>;
}

/// Delegates to the managed device registry.
pub struct ManagedRegistryGate {
    registry: Arc<dyn DeviceRegistry>,
}

impl ManagedRegistryGate {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RegistryGate for ManagedRegistryGate {
    async fn is_whitelisted(&self, device_id: &str) -> Result<bool> {
        Ok(self.registry.get_device(device_id).await?.is_some())
    }

    async fn update_asset_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        identity_arn: Option<&str>,
    ) -> Result<()> {
        self.registry
            .update_device(
                device_id,
                DevicePatch {
                    status: Some(status),
                    identity_arn: identity_arn.map(str::to_string),
                    rotation_status: None,
                },
            )
            .await
    }
}

/// Delegates to an external device-identity registry. That registry has no
/// notion of an identity ARN, so the argument is dropped here.
pub struct IdentityServiceGate {
    identity: Arc<dyn IdentityService>,
}

impl IdentityServiceGate {
    pub fn new(identity: Arc<dyn IdentityService>) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl RegistryGate for IdentityServiceGate {
    async fn is_whitelisted(&self, device_id: &str) -> Result<bool> {
        self.identity.find_device(device_id).await
    }

    async fn update_asset_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        _identity_arn: Option<&str>,
    ) -> Result<()> {
        self.identity.set_status(device_id, status).await
    }
}

/// Accepts every device. Status updates are logged no-ops.
pub struct OpenGate;

#[async_trait]
impl RegistryGate for OpenGate {
    async fn is_whitelisted(&self, _device_id: &str) -> Result<bool> {
        Ok(true)
    }

    async fn update_asset_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        _identity_arn: Option<&str>,
    ) -> Result<()> {
        debug!(device_id, %status, "open gate: status update ignored");
        Ok(())
    }
}

/// Build the gate selected by configuration.
pub fn registry_gate_from_config(
    config: &RegistryGateConfig,
    registry: Arc<dyn DeviceRegistry>,
    identity: Arc<dyn IdentityService>,
) -> Arc<dyn RegistryGate> {
    match config.strategy {
        GateStrategy::DeviceRegistry => Arc::new(ManagedRegistryGate::new(registry)),
        GateStrategy::IdentityService => Arc::new(IdentityServiceGate::new(identity)),
        GateStrategy::AllowAll => Arc::new(OpenGate),
    }
}
