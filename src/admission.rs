//! Admission validation for just-in-time registered certificates.
//!
//! Decides activate vs. revoke for every new-certificate registration
//! event. Revocation takes precedence over everything else; an unknown
//! device is revoked, a known one is provisioned and marked active.

use crate::clients::{CertificateAuthority, DeviceRegistry, Provisioner, ProvisioningRequest};
use crate::error::FleetCertError;
use crate::gate::RegistryGate;
use crate::revocation::RevocationStoreReader;
use crate::types::{DeviceStatus, RegistrationEvent};
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Policy type carrying the provisioning template reference.
const PROVISIONING_POLICY_TYPE: &str = "provisioning";

/// Terminal outcome of one admission check. Revocations are valid
/// outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Activated {
        device_id: String,
        identity_arn: String,
    },
    RevokedListed,
    RevokedUnknownDevice {
        device_id: String,
    },
}

pub struct AdmissionValidator {
    revocation: RevocationStoreReader,
    gate: Arc<dyn RegistryGate>,
    registry: Arc<dyn DeviceRegistry>,
    authority: Arc<dyn CertificateAuthority>,
    provisioner: Arc<dyn Provisioner>,
}

impl AdmissionValidator {
    pub fn new(
        revocation: RevocationStoreReader,
        gate: Arc<dyn RegistryGate>,
        registry: Arc<dyn DeviceRegistry>,
        authority: Arc<dyn CertificateAuthority>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            revocation,
            gate,
            registry,
            authority,
            provisioner,
        }
    }

    /// Validate one registration event. Downstream fetch errors propagate
    /// uncaught; the caller's retry policy owns them.
    pub async fn activate(&self, event: &RegistrationEvent) -> Result<AdmissionOutcome> {
        event.validate()?;

        let revocation_list = self.revocation.fetch().await?;
        if revocation_list.is_revoked(&event.certificate_id) {
            warn!(
                certificate_id = %event.certificate_id,
                "registered certificate is on the revocation list, revoking"
            );
            self.authority
                .revoke_certificate(&event.certificate_id)
                .await?;
            return Ok(AdmissionOutcome::RevokedListed);
        }

        let description = self
            .authority
            .describe_certificate(&event.certificate_id)
            .await?;
        let device_id = common_name(&description.pem)?;

        if !self.gate.is_whitelisted(&device_id).await? {
            warn!(
                certificate_id = %event.certificate_id,
                %device_id,
                "device is not whitelisted, revoking certificate"
            );
            self.authority
                .revoke_certificate(&event.certificate_id)
                .await?;
            return Ok(AdmissionOutcome::RevokedUnknownDevice { device_id });
        }

        let template_id = self.provisioning_template(&device_id).await?;
        let identity = self
            .provisioner
            .provision(ProvisioningRequest {
                device_id: device_id.clone(),
                certificate_id: event.certificate_id.clone(),
                template_id,
            })
            .await?;

        self.gate
            .update_asset_status(&device_id, DeviceStatus::Active, Some(&identity.identity_arn))
            .await?;

        info!(
            certificate_id = %event.certificate_id,
            %device_id,
            identity_arn = %identity.identity_arn,
            "device activated"
        );
        Ok(AdmissionOutcome::Activated {
            device_id,
            identity_arn: identity.identity_arn,
        })
    }

    /// Read the provisioning template from the device's inherited policy
    /// documents. When several documents are inherited the first in
    /// registry-return order wins; there is no documented tie-break rule,
    /// so the situation is surfaced as a warning.
    async fn provisioning_template(&self, device_id: &str) -> Result<String> {
        let policies = self
            .registry
            .list_inherited_policies(device_id, PROVISIONING_POLICY_TYPE)
            .await?;

        if policies.len() > 1 {
            warn!(
                device_id,
                documents = policies.len(),
                "multiple inherited provisioning policies, using the first"
            );
        }

        policies
            .first()
            .and_then(|p| p.document.get("template"))
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| FleetCertError::ProvisioningTemplateNotFound(device_id.to_string()))
    }
}

/// Extract the subject Common Name from a PEM certificate. The CN carries
/// the device identity for fleet certificates.
pub fn common_name(certificate_pem: &str) -> Result<String> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(certificate_pem.as_bytes())
        .map_err(|e| FleetCertError::CertificateParse(format!("invalid PEM: {}", e)))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| FleetCertError::CertificateParse(format!("invalid X.509: {}", e)))?;
    // The CN is copied out before `cert` (borrowing `pem`) is dropped.
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    cn.ok_or_else(|| FleetCertError::CertificateParse("certificate has no Common Name".to_string()))
}
