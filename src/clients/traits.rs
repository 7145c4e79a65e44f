use crate::{types::*, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// Managed device registry: the authoritative record of fleet devices and
/// their inherited authorization policies.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>>;
    async fn update_device(&self, device_id: &str, patch: DevicePatch) -> Result<()>;
    async fn list_inherited_policies(
        &self,
        device_id: &str,
        policy_type: &str,
    ) -> Result<Vec<PolicyDocument>>;
}

/// Issue request handed to the certificate authority. The authority
/// generates the key pair; devices that keep their own keys go through
/// `sign_csr` instead.
#[derive(Debug, Clone)]
pub struct IssueCertificateRequest {
    pub device_id: DeviceId,
    pub set_active: bool,
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn issue_certificate(&self, request: IssueCertificateRequest)
        -> Result<IssuedCertificate>;
    /// Sign a device-supplied PEM certificate signing request. The issued
    /// certificate is bound to the request's public key; no private key
    /// material is returned.
    async fn sign_csr(&self, csr_pem: &str) -> Result<IssuedCertificate>;
    async fn revoke_certificate(&self, certificate_id: &str) -> Result<()>;
    async fn describe_certificate(&self, certificate_id: &str) -> Result<CertificateDescription>;
    async fn set_certificate_status(
        &self,
        certificate_id: &str,
        status: CertificateStatus,
    ) -> Result<()>;
    async fn delete_certificate(&self, certificate_id: &str) -> Result<()>;
    async fn list_attached_policies(&self, certificate_arn: &str) -> Result<Vec<String>>;
    async fn attach_policy(&self, certificate_arn: &str, policy_name: &str) -> Result<()>;
    async fn attach_to_device(&self, certificate_arn: &str, device_id: &str) -> Result<()>;
    async fn list_devices_for_certificate(
        &self,
        certificate_arn: &str,
        page_token: Option<&str>,
    ) -> Result<DevicePage>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes>;
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<()>;
}

/// Durable queue used for scanner fan-out. At-least-once delivery, no
/// ordering assumed between sibling messages.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(&self, queue_url: &str, body: String) -> Result<()>;
}

/// Key-value store backing the idempotency ledger.
///
/// `put_item_if_absent` must be a conditional insert: it returns `false`
/// (without overwriting) when a record already exists for the key, so
/// concurrent duplicate deliveries for the same expiring certificate
/// resolve to a single replacement.
#[async_trait]
pub trait KeyValueLedger: Send + Sync {
    async fn get_item(&self, expiring_certificate_arn: &str)
        -> Result<Option<CertificateRenewalRecord>>;
    async fn put_item_if_absent(&self, record: CertificateRenewalRecord) -> Result<bool>;
}

#[async_trait]
pub trait AuditFeed: Send + Sync {
    async fn list_findings(
        &self,
        check_name: &str,
        task_id: &str,
        page_token: Option<&str>,
    ) -> Result<FindingsPage>;
}

#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub device_id: DeviceId,
    pub certificate_id: CertificateId,
    pub template_id: String,
}

#[derive(Debug, Clone)]
pub struct ProvisionedIdentity {
    pub identity_arn: String,
}

/// Provisioning collaborator that turns a validated registration into an
/// operational credential for the device.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, request: ProvisioningRequest) -> Result<ProvisionedIdentity>;
}

/// Publish-only channel used to answer devices during rotation. Payloads
/// are JSON; the channel name is device-specific.
#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;
}

/// External device-identity registry consulted by one of the whitelist
/// gate strategies. It knows devices by identity name only and carries no
/// identity ARN.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn find_device(&self, device_id: &str) -> Result<bool>;
    async fn set_status(&self, device_id: &str, status: DeviceStatus) -> Result<()>;
}
