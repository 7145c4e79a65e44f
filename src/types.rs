use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type DeviceId = String;
pub type CertificateId = String;
pub type CertificateArn = String;

/// Payload delivered once per just-in-time certificate registration.
///
/// `aws_account_id` identifies the owning account but is advisory only;
/// admission never re-validates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationEvent {
    pub certificate_id: CertificateId,
    pub ca_certificate_id: CertificateId,
    pub timestamp: DateTime<Utc>,
    pub aws_account_id: String,
}

impl RegistrationEvent {
    /// Boundary validation. Malformed events are rejected before any
    /// business logic runs and must not be redelivered by the caller.
    pub fn validate(&self) -> crate::Result<()> {
        if self.certificate_id.is_empty() {
            return Err(crate::error::FleetCertError::InvalidInput(
                "registration event missing certificateId".to_string(),
            ));
        }
        if self.ca_certificate_id.is_empty() {
            return Err(crate::error::FleetCertError::InvalidInput(
                "registration event missing caCertificateId".to_string(),
            ));
        }
        Ok(())
    }
}

/// Immutable revocation snapshot, re-fetched on every admission check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationList {
    pub revoked_certificates: Vec<RevokedCertificate>,
    pub last_update: DateTime<Utc>,
}

impl RevocationList {
    pub fn is_revoked(&self, certificate_id: &str) -> bool {
        self.revoked_certificates
            .iter()
            .any(|r| r.certificate_id == certificate_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokedCertificate {
    pub certificate_id: CertificateId,
    pub revoked_on: DateTime<Utc>,
    pub revoked_reason: RevocationReason,
}

/// Reasons for certificate revocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    Superseded,
    CessationOfOperation,
}

/// Idempotency ledger entry keyed by the expiring certificate's ARN.
///
/// Written exactly once when a replacement is first issued; never updated
/// or deleted by this subsystem. For a given `expiring_certificate_arn`
/// at most one `renewed_certificate_arn` ever exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRenewalRecord {
    pub expiring_certificate_arn: CertificateArn,
    pub thing_name: DeviceId,
    pub renewed_certificate_arn: CertificateArn,
    pub renewed_certificate_id: CertificateId,
    pub renewed_certificate_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub status: DeviceStatus,
    pub identity_arn: Option<String>,
    pub rotation_status: Option<RotationStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Inactive,
    Pending,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Active => write!(f, "active"),
            DeviceStatus::Inactive => write!(f, "inactive"),
            DeviceStatus::Pending => write!(f, "pending"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationStatus {
    Success,
    Failed,
}

/// Partial update applied to a device record. `None` fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePatch {
    pub status: Option<DeviceStatus>,
    pub identity_arn: Option<String>,
    pub rotation_status: Option<RotationStatus>,
}

/// Authorization policy document inherited by a device from its registry
/// hierarchy. Admission reads the first document's `"template"` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    pub name: String,
    pub document: serde_json::Value,
}

/// Certificate material returned by the authority on issuance.
///
/// `private_key_pem` is `None` on the CSR path: the device generated the
/// key pair and never shares the private half.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCertificate {
    pub certificate_id: CertificateId,
    pub certificate_arn: CertificateArn,
    pub certificate_pem: String,
    pub private_key_pem: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDescription {
    pub certificate_id: CertificateId,
    pub certificate_arn: CertificateArn,
    pub pem: String,
    pub status: CertificateStatus,
}

/// Certificate status tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Active,
    Inactive,
    Revoked,
}

/// Scheduled notification from the audit/compliance feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditNotification {
    pub task_id: String,
    pub non_compliant_checks_count: u32,
    #[serde(default)]
    pub check_details: Vec<AuditCheckDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditCheckDetail {
    pub name: String,
    pub non_compliant_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFinding {
    pub certificate_id: CertificateId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingsPage {
    pub findings: Vec<AuditFinding>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePage {
    pub device_ids: Vec<DeviceId>,
    pub next_token: Option<String>,
}

/// One unit of renewal work: a device paired with the certificate it is
/// presenting that is about to expire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalPair {
    pub device_id: DeviceId,
    pub expiring_certificate_arn: CertificateArn,
}

/// Device-initiated rotation protocol request, validated once at the
/// boundary. The discriminator replaces ad hoc optional-field probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum RotationRequest {
    #[serde(rename_all = "camelCase")]
    Get {
        device_id: DeviceId,
        /// Certificate the device is presenting on this connection. Not
        /// retired by `get`; cleanup happens only when an `ack` names a
        /// predecessor.
        cert_id: CertificateId,
        csr: Option<String>,
        previous_certificate_id: Option<CertificateId>,
    },
    #[serde(rename_all = "camelCase")]
    Ack {
        device_id: DeviceId,
        cert_id: CertificateId,
        previous_certificate_id: Option<CertificateId>,
    },
}

impl RotationRequest {
    pub fn device_id(&self) -> &str {
        match self {
            RotationRequest::Get { device_id, .. } => device_id,
            RotationRequest::Ack { device_id, .. } => device_id,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        let (device_id, cert_id) = match self {
            RotationRequest::Get {
                device_id, cert_id, ..
            } => (device_id, cert_id),
            RotationRequest::Ack {
                device_id, cert_id, ..
            } => (device_id, cert_id),
        };
        if device_id.is_empty() {
            return Err(crate::error::FleetCertError::InvalidInput(
                "rotation request missing deviceId".to_string(),
            ));
        }
        if cert_id.is_empty() && matches!(self, RotationRequest::Ack { .. }) {
            return Err(crate::error::FleetCertError::InvalidInput(
                "rotation ack missing certId".to_string(),
            ));
        }
        Ok(())
    }
}

/// Success-channel payload handed to the device after `get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationGrant {
    pub certificate_id: CertificateId,
    pub certificate_pem: String,
    pub private_key_pem: Option<String>,
}

/// Failure-channel payload; devices receive a signaled failure rather
/// than a timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationFailure {
    pub device_id: DeviceId,
    pub reason: String,
}
