//! Device-initiated rotation protocol.
//!
//! A connected device drives rotation with two actions: `get` requests a
//! new certificate (optionally bound to a device-held key via CSR) and
//! `ack` confirms receipt and retires the predecessor. Devices are
//! answered on a channel in both directions; unknown devices receive a
//! signaled failure rather than a thrown error, since the caller is a
//! remote, possibly unattended, device.

use crate::clients::{
    CertificateAuthority, ChannelPublisher, DeviceRegistry, IssueCertificateRequest,
};
use crate::config::RotationConfig;
use crate::gate::RegistryGate;
use crate::types::{
    CertificateStatus, DevicePatch, RotationFailure, RotationGrant, RotationRequest,
    RotationStatus,
};
use crate::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct DeviceRotationHandler {
    gate: Arc<dyn RegistryGate>,
    authority: Arc<dyn CertificateAuthority>,
    registry: Arc<dyn DeviceRegistry>,
    publisher: Arc<dyn ChannelPublisher>,
    config: RotationConfig,
}

impl DeviceRotationHandler {
    pub fn new(
        gate: Arc<dyn RegistryGate>,
        authority: Arc<dyn CertificateAuthority>,
        registry: Arc<dyn DeviceRegistry>,
        publisher: Arc<dyn ChannelPublisher>,
        config: RotationConfig,
    ) -> Self {
        Self {
            gate,
            authority,
            registry,
            publisher,
            config,
        }
    }

    /// Handle one device action. Malformed requests are logged and
    /// rejected without a channel response; everything else is answered on
    /// the device's success or failure channel.
    pub async fn handle(&self, request: &RotationRequest) -> Result<()> {
        if let Err(e) = request.validate() {
            error!(error = %e, ?request, "dropping malformed rotation request");
            return Err(e);
        }

        match request {
            RotationRequest::Get {
                device_id,
                cert_id,
                csr,
                previous_certificate_id,
            } => {
                self.handle_get(
                    device_id,
                    cert_id,
                    csr.as_deref(),
                    previous_certificate_id.as_deref(),
                )
                .await
            }
            RotationRequest::Ack {
                device_id,
                cert_id,
                previous_certificate_id,
            } => {
                self.handle_ack(device_id, cert_id, previous_certificate_id.as_deref())
                    .await
            }
        }
    }

    /// `presented_cert_id` is the certificate the device is connecting
    /// with. Issuance does not touch it; it is traced here and retired
    /// only when a later ack names it as predecessor.
    async fn handle_get(
        &self,
        device_id: &str,
        presented_cert_id: &str,
        csr: Option<&str>,
        previous_certificate_id: Option<&str>,
    ) -> Result<()> {
        // Whitelisting precedes any issuance.
        if !self.gate.is_whitelisted(device_id).await? {
            warn!(device_id, "rotation requested by unknown device");
            return self
                .publish_failure(device_id, "device is not whitelisted")
                .await;
        }

        // The presence of a predecessor id marks this as a rotation rather
        // than a first issuance; it only becomes meaningful at ack time.
        if previous_certificate_id.is_some() {
            info!(device_id, presented_cert_id, "rotation issuance requested");
        }

        let issued = match csr {
            Some(csr_pem) => self.authority.sign_csr(csr_pem).await?,
            None => {
                self.authority
                    .issue_certificate(IssueCertificateRequest {
                        device_id: device_id.to_string(),
                        set_active: true,
                    })
                    .await?
            }
        };

        let grant = RotationGrant {
            certificate_id: issued.certificate_id.clone(),
            certificate_pem: issued.certificate_pem,
            private_key_pem: issued.private_key_pem,
        };
        self.publisher
            .publish(
                &self.config.accepted_channel(device_id),
                serde_json::to_string(&grant)?,
            )
            .await?;

        info!(
            device_id,
            presented_cert_id,
            certificate_id = %issued.certificate_id,
            via_csr = csr.is_some(),
            "rotation certificate issued"
        );
        Ok(())
    }

    async fn handle_ack(
        &self,
        device_id: &str,
        cert_id: &str,
        previous_certificate_id: Option<&str>,
    ) -> Result<()> {
        self.registry
            .update_device(
                device_id,
                DevicePatch {
                    status: None,
                    identity_arn: None,
                    rotation_status: Some(RotationStatus::Success),
                },
            )
            .await?;

        // Cleanup targets exactly the named predecessor, never the
        // certificate the device is presenting now.
        if let Some(previous) = previous_certificate_id {
            if previous == cert_id {
                warn!(
                    device_id,
                    cert_id, "ack names the acknowledged certificate as predecessor, skipping cleanup"
                );
            } else {
                self.authority
                    .set_certificate_status(previous, CertificateStatus::Inactive)
                    .await?;
                if self.config.delete_replaced_certificates {
                    self.authority.delete_certificate(previous).await?;
                }
                info!(
                    device_id,
                    previous,
                    deleted = self.config.delete_replaced_certificates,
                    "predecessor certificate retired"
                );
            }
        }

        let receipt = serde_json::json!({
            "deviceId": device_id,
            "certId": cert_id,
            "status": "acknowledged",
        });
        self.publisher
            .publish(
                &self.config.accepted_channel(device_id),
                receipt.to_string(),
            )
            .await?;
        Ok(())
    }

    async fn publish_failure(&self, device_id: &str, reason: &str) -> Result<()> {
        let failure = RotationFailure {
            device_id: device_id.to_string(),
            reason: reason.to_string(),
        };
        self.publisher
            .publish(
                &self.config.rejected_channel(device_id),
                serde_json::to_string(&failure)?,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::{
        InMemoryCertificateAuthority, InMemoryChannelPublisher, InMemoryDeviceRegistry,
    };
    use crate::gate::ManagedRegistryGate;
    use crate::types::{DeviceRecord, DeviceStatus};
    use rcgen::{Certificate, CertificateParams, DistinguishedName, KeyPair};

    struct Fixture {
        handler: DeviceRotationHandler,
        authority: Arc<InMemoryCertificateAuthority>,
        registry: Arc<InMemoryDeviceRegistry>,
        publisher: Arc<InMemoryChannelPublisher>,
        config: RotationConfig,
    }

    fn fixture(delete_replaced: bool) -> Fixture {
        let authority = Arc::new(InMemoryCertificateAuthority::new().unwrap());
        let registry = Arc::new(InMemoryDeviceRegistry::new());
        let publisher = Arc::new(InMemoryChannelPublisher::new());
        let gate = Arc::new(ManagedRegistryGate::new(registry.clone()));
        let config = RotationConfig {
            delete_replaced_certificates: delete_replaced,
            ..Default::default()
        };
        let handler = DeviceRotationHandler::new(
            gate,
            authority.clone(),
            registry.clone(),
            publisher.clone(),
            config.clone(),
        );
        Fixture {
            handler,
            authority,
            registry,
            publisher,
            config,
        }
    }

    fn known_device(registry: &InMemoryDeviceRegistry, device_id: &str) {
        registry.insert_device(DeviceRecord {
            device_id: device_id.to_string(),
            status: DeviceStatus::Active,
            identity_arn: None,
            rotation_status: None,
        });
    }

    fn device_csr(common_name: &str) -> String {
        let key_pair = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = CertificateParams::new(vec![]);
        let mut dn = DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        params.key_pair = Some(key_pair);
        Certificate::from_params(params)
            .unwrap()
            .serialize_request_pem()
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_issues_and_publishes_grant() {
        let fx = fixture(false);
        known_device(&fx.registry, "sensor-1");

        fx.handler
            .handle(&RotationRequest::Get {
                device_id: "sensor-1".to_string(),
                cert_id: String::new(),
                csr: None,
                previous_certificate_id: None,
            })
            .await
            .unwrap();

        let published = fx
            .publisher
            .on_channel(&fx.config.accepted_channel("sensor-1"));
        assert_eq!(published.len(), 1);
        let grant: RotationGrant = serde_json::from_str(&published[0]).unwrap();
        assert!(grant.certificate_pem.contains("BEGIN CERTIFICATE"));
        assert!(grant.private_key_pem.is_some());
        assert_eq!(fx.authority.issue_call_count(), 1);
    }

    #[tokio::test]
    async fn test_get_with_csr_keeps_device_key() {
        let fx = fixture(false);
        known_device(&fx.registry, "sensor-2");

        fx.handler
            .handle(&RotationRequest::Get {
                device_id: "sensor-2".to_string(),
                cert_id: String::new(),
                csr: Some(device_csr("sensor-2")),
                previous_certificate_id: Some("old".to_string()),
            })
            .await
            .unwrap();

        let published = fx
            .publisher
            .on_channel(&fx.config.accepted_channel("sensor-2"));
        let grant: RotationGrant = serde_json::from_str(&published[0]).unwrap();
        assert!(grant.private_key_pem.is_none());
    }

    #[tokio::test]
    async fn test_get_leaves_presented_certificate_active() {
        let fx = fixture(false);
        known_device(&fx.registry, "sensor-6");
        let current = fx.authority.seed_certificate("current-6", "sensor-6").unwrap();

        fx.handler
            .handle(&RotationRequest::Get {
                device_id: "sensor-6".to_string(),
                cert_id: current.certificate_id.clone(),
                csr: None,
                previous_certificate_id: None,
            })
            .await
            .unwrap();

        let published = fx
            .publisher
            .on_channel(&fx.config.accepted_channel("sensor-6"));
        let grant: RotationGrant = serde_json::from_str(&published[0]).unwrap();
        assert_ne!(grant.certificate_id, current.certificate_id);
        // The presented certificate stays active until the device acks.
        assert_eq!(
            fx.authority.status_of(&current.certificate_id),
            Some(CertificateStatus::Active)
        );
        assert!(fx.authority.deleted_certificates().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_device_gets_failure_channel_response() {
        let fx = fixture(false);

        fx.handler
            .handle(&RotationRequest::Get {
                device_id: "stranger".to_string(),
                cert_id: String::new(),
                csr: None,
                previous_certificate_id: None,
            })
            .await
            .unwrap();

        assert_eq!(fx.authority.issue_call_count(), 0);
        let rejected = fx
            .publisher
            .on_channel(&fx.config.rejected_channel("stranger"));
        assert_eq!(rejected.len(), 1);
        let failure: RotationFailure = serde_json::from_str(&rejected[0]).unwrap();
        assert_eq!(failure.device_id, "stranger");
        assert!(fx
            .publisher
            .on_channel(&fx.config.accepted_channel("stranger"))
            .is_empty());
    }

    #[tokio::test]
    async fn test_ack_retires_exactly_the_named_predecessor() {
        let fx = fixture(false);
        known_device(&fx.registry, "sensor-3");
        let old = fx.authority.seed_certificate("old-3", "sensor-3").unwrap();
        let new = fx.authority.seed_certificate("new-3", "sensor-3").unwrap();

        fx.handler
            .handle(&RotationRequest::Ack {
                device_id: "sensor-3".to_string(),
                cert_id: new.certificate_id.clone(),
                previous_certificate_id: Some(old.certificate_id.clone()),
            })
            .await
            .unwrap();

        assert_eq!(
            fx.authority.status_of(&old.certificate_id),
            Some(CertificateStatus::Inactive)
        );
        assert_eq!(
            fx.authority.status_of(&new.certificate_id),
            Some(CertificateStatus::Active)
        );
        assert!(fx.authority.deleted_certificates().is_empty());

        let record = fx.registry.device("sensor-3").unwrap();
        assert_eq!(record.rotation_status, Some(RotationStatus::Success));
    }

    #[tokio::test]
    async fn test_ack_deletes_predecessor_when_flag_set() {
        let fx = fixture(true);
        known_device(&fx.registry, "sensor-4");
        let old = fx.authority.seed_certificate("old-4", "sensor-4").unwrap();
        fx.authority.seed_certificate("new-4", "sensor-4").unwrap();

        fx.handler
            .handle(&RotationRequest::Ack {
                device_id: "sensor-4".to_string(),
                cert_id: "new-4".to_string(),
                previous_certificate_id: Some(old.certificate_id.clone()),
            })
            .await
            .unwrap();

        assert_eq!(
            fx.authority.deleted_certificates(),
            vec![old.certificate_id]
        );
    }

    #[tokio::test]
    async fn test_ack_never_touches_the_acknowledged_certificate() {
        let fx = fixture(true);
        known_device(&fx.registry, "sensor-5");
        let new = fx.authority.seed_certificate("new-5", "sensor-5").unwrap();

        fx.handler
            .handle(&RotationRequest::Ack {
                device_id: "sensor-5".to_string(),
                cert_id: new.certificate_id.clone(),
                previous_certificate_id: Some(new.certificate_id.clone()),
            })
            .await
            .unwrap();

        assert_eq!(
            fx.authority.status_of(&new.certificate_id),
            Some(CertificateStatus::Active)
        );
        assert!(fx.authority.deleted_certificates().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_request_is_dropped_without_response() {
        let fx = fixture(false);
        let result = fx
            .handler
            .handle(&RotationRequest::Ack {
                device_id: String::new(),
                cert_id: "c".to_string(),
                previous_certificate_id: None,
            })
            .await;
        assert!(result.is_err());
        assert!(fx.publisher.published().is_empty());
    }
}
