//! In-process collaborator backends.
//!
//! Every boundary trait gets a HashMap-backed implementation suitable for
//! local wiring and tests. The certificate authority is real enough to
//! matter: it signs ECDSA P-256 material with an in-process CA via rcgen,
//! including the CSR path, so admission-time subject parsing operates on
//! genuine certificates.

use crate::clients::traits::*;
use crate::error::FleetCertError;
use crate::{types::*, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rcgen::{Certificate, CertificateParams, CertificateSigningRequest, DistinguishedName, KeyPair};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

fn hex_digest(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn certificate_arn(certificate_id: &str) -> String {
    format!("arn:fleet:cert/{}", certificate_id)
}

fn arn_to_id(key: &str) -> &str {
    key.strip_prefix("arn:fleet:cert/").unwrap_or(key)
}

#[derive(Debug, Clone)]
struct CertificateEntry {
    description: CertificateDescription,
    policies: Vec<String>,
    devices: Vec<DeviceId>,
}

/// In-process certificate authority backed by a self-signed rcgen root.
pub struct InMemoryCertificateAuthority {
    ca: Mutex<Certificate>,
    certificates: RwLock<HashMap<CertificateId, CertificateEntry>>,
    issue_calls: RwLock<u64>,
    revoked: RwLock<Vec<CertificateId>>,
    deleted: RwLock<Vec<CertificateId>>,
    device_page_size: usize,
}

impl InMemoryCertificateAuthority {
    pub fn new() -> Result<Self> {
        let key_pair = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        let mut params = CertificateParams::new(vec![]);
        let mut dn = DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, "FleetCert Root CA");
        params.distinguished_name = dn;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        params.key_pair = Some(key_pair);
        let ca = Certificate::from_params(params)?;

        Ok(Self {
            ca: Mutex::new(ca),
            certificates: RwLock::new(HashMap::new()),
            issue_calls: RwLock::new(0),
            revoked: RwLock::new(Vec::new()),
            deleted: RwLock::new(Vec::new()),
            device_page_size: 10,
        })
    }

    pub fn with_device_page_size(mut self, page_size: usize) -> Self {
        self.device_page_size = page_size;
        self
    }

    fn register(&self, pem: String, private_key_pem: Option<String>, active: bool) -> IssuedCertificate {
        let certificate_id = hex_digest(pem.as_bytes());
        let arn = certificate_arn(&certificate_id);
        let entry = CertificateEntry {
            description: CertificateDescription {
                certificate_id: certificate_id.clone(),
                certificate_arn: arn.clone(),
                pem: pem.clone(),
                status: if active {
                    CertificateStatus::Active
                } else {
                    CertificateStatus::Inactive
                },
            },
            policies: Vec::new(),
            devices: Vec::new(),
        };
        self.certificates
            .write()
            .insert(certificate_id.clone(), entry);

        IssuedCertificate {
            certificate_id,
            certificate_arn: arn,
            certificate_pem: pem,
            private_key_pem,
        }
    }

    /// Pre-load a certificate with a known id, as if registered out of band.
    pub fn seed_certificate(&self, certificate_id: &str, device_id: &str) -> Result<IssuedCertificate> {
        let issued = self.issue_for_subject(device_id)?;
        let mut certs = self.certificates.write();
        let mut entry = certs.remove(&issued.certificate_id).expect("just inserted");
        entry.description.certificate_id = certificate_id.to_string();
        entry.description.certificate_arn = certificate_arn(certificate_id);
        certs.insert(certificate_id.to_string(), entry);
        Ok(IssuedCertificate {
            certificate_id: certificate_id.to_string(),
            certificate_arn: certificate_arn(certificate_id),
            ..issued
        })
    }

    fn issue_for_subject(&self, common_name: &str) -> Result<IssuedCertificate> {
        let key_pair = KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        let mut params = CertificateParams::new(vec![]);
        let mut dn = DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
        params.key_pair = Some(key_pair);
        let cert = Certificate::from_params(params)?;

        let ca = self.ca.lock();
        let pem = cert.serialize_pem_with_signer(&ca)?;
        let key_pem = cert.serialize_private_key_pem();
        Ok(self.register(pem, Some(key_pem), true))
    }

    pub fn issue_call_count(&self) -> u64 {
        *self.issue_calls.read()
    }

    pub fn revoked_certificates(&self) -> Vec<CertificateId> {
        self.revoked.read().clone()
    }

    pub fn deleted_certificates(&self) -> Vec<CertificateId> {
        self.deleted.read().clone()
    }

    pub fn status_of(&self, certificate_id: &str) -> Option<CertificateStatus> {
        self.certificates
            .read()
            .get(arn_to_id(certificate_id))
            .map(|e| e.description.status)
    }

    pub fn policies_of(&self, certificate: &str) -> Vec<String> {
        self.certificates
            .read()
            .get(arn_to_id(certificate))
            .map(|e| e.policies.clone())
            .unwrap_or_default()
    }

    pub fn devices_of(&self, certificate: &str) -> Vec<DeviceId> {
        self.certificates
            .read()
            .get(arn_to_id(certificate))
            .map(|e| e.devices.clone())
            .unwrap_or_default()
    }

    /// Attach seed state directly, bypassing the issue counters.
    pub fn seed_policy(&self, certificate: &str, policy_name: &str) {
        if let Some(entry) = self.certificates.write().get_mut(arn_to_id(certificate)) {
            entry.policies.push(policy_name.to_string());
        }
    }

    pub fn seed_device(&self, certificate: &str, device_id: &str) {
        if let Some(entry) = self.certificates.write().get_mut(arn_to_id(certificate)) {
            entry.devices.push(device_id.to_string());
        }
    }
}

#[async_trait]
impl CertificateAuthority for InMemoryCertificateAuthority {
    async fn issue_certificate(
        &self,
        request: IssueCertificateRequest,
    ) -> Result<IssuedCertificate> {
        *self.issue_calls.write() += 1;
        let mut issued = self.issue_for_subject(&request.device_id)?;
        if !request.set_active {
            self.certificates
                .write()
                .get_mut(&issued.certificate_id)
                .expect("just registered")
                .description
                .status = CertificateStatus::Inactive;
        }
        issued.certificate_arn = certificate_arn(&issued.certificate_id);
        Ok(issued)
    }

    async fn sign_csr(&self, csr_pem: &str) -> Result<IssuedCertificate> {
        *self.issue_calls.write() += 1;
        let csr = CertificateSigningRequest::from_pem(csr_pem)
            .map_err(|e| FleetCertError::CertificateParse(format!("invalid CSR: {}", e)))?;
        let pem = {
            let ca = self.ca.lock();
            csr.serialize_pem_with_signer(&ca)?
        };
        Ok(self.register(pem, None, true))
    }

    async fn revoke_certificate(&self, certificate_id: &str) -> Result<()> {
        self.revoked.write().push(certificate_id.to_string());
        if let Some(entry) = self.certificates.write().get_mut(arn_to_id(certificate_id)) {
            entry.description.status = CertificateStatus::Revoked;
        }
        Ok(())
    }

    async fn describe_certificate(&self, certificate_id: &str) -> Result<CertificateDescription> {
        self.certificates
            .read()
            .get(arn_to_id(certificate_id))
            .map(|e| e.description.clone())
            .ok_or_else(|| FleetCertError::CertificateNotFound(certificate_id.to_string()))
    }

    async fn set_certificate_status(
        &self,
        certificate_id: &str,
        status: CertificateStatus,
    ) -> Result<()> {
        let mut certs = self.certificates.write();
        let entry = certs
            .get_mut(arn_to_id(certificate_id))
            .ok_or_else(|| FleetCertError::CertificateNotFound(certificate_id.to_string()))?;
        entry.description.status = status;
        Ok(())
    }

    async fn delete_certificate(&self, certificate_id: &str) -> Result<()> {
        self.deleted.write().push(certificate_id.to_string());
        self.certificates.write().remove(arn_to_id(certificate_id));
        Ok(())
    }

    async fn list_attached_policies(&self, certificate_arn: &str) -> Result<Vec<String>> {
        self.certificates
            .read()
            .get(arn_to_id(certificate_arn))
            .map(|e| e.policies.clone())
            .ok_or_else(|| FleetCertError::CertificateNotFound(certificate_arn.to_string()))
    }

    async fn attach_policy(&self, certificate_arn: &str, policy_name: &str) -> Result<()> {
        let mut certs = self.certificates.write();
        let entry = certs
            .get_mut(arn_to_id(certificate_arn))
            .ok_or_else(|| FleetCertError::CertificateNotFound(certificate_arn.to_string()))?;
        // Attachment is idempotent, like the real authority.
        if !entry.policies.iter().any(|p| p == policy_name) {
            entry.policies.push(policy_name.to_string());
        }
        Ok(())
    }

    async fn attach_to_device(&self, certificate_arn: &str, device_id: &str) -> Result<()> {
        let mut certs = self.certificates.write();
        let entry = certs
            .get_mut(arn_to_id(certificate_arn))
            .ok_or_else(|| FleetCertError::CertificateNotFound(certificate_arn.to_string()))?;
        if !entry.devices.iter().any(|d| d == device_id) {
            entry.devices.push(device_id.to_string());
        }
        Ok(())
    }

    async fn list_devices_for_certificate(
        &self,
        certificate_arn: &str,
        page_token: Option<&str>,
    ) -> Result<DevicePage> {
        let devices = self
            .certificates
            .read()
            .get(arn_to_id(certificate_arn))
            .map(|e| e.devices.clone())
            .ok_or_else(|| FleetCertError::CertificateNotFound(certificate_arn.to_string()))?;
        let offset: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| FleetCertError::Authority(format!("bad page token: {}", token)))?,
            None => 0,
        };
        let page: Vec<DeviceId> = devices
            .iter()
            .skip(offset)
            .take(self.device_page_size)
            .cloned()
            .collect();
        let consumed = offset + page.len();
        let next_token = if consumed < devices.len() {
            Some(consumed.to_string())
        } else {
            None
        };
        Ok(DevicePage {
            device_ids: page,
            next_token,
        })
    }
}

#[derive(Default)]
pub struct InMemoryDeviceRegistry {
    devices: RwLock<HashMap<DeviceId, DeviceRecord>>,
    policies: RwLock<HashMap<DeviceId, Vec<PolicyDocument>>>,
    update_calls: RwLock<Vec<(DeviceId, DevicePatch)>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_device(&self, record: DeviceRecord) {
        self.devices.write().insert(record.device_id.clone(), record);
    }

    pub fn set_policies(&self, device_id: &str, policies: Vec<PolicyDocument>) {
        self.policies.write().insert(device_id.to_string(), policies);
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.read().get(device_id).cloned()
    }

    pub fn update_calls(&self) -> Vec<(DeviceId, DevicePatch)> {
        self.update_calls.read().clone()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>> {
        Ok(self.devices.read().get(device_id).cloned())
    }

    async fn update_device(&self, device_id: &str, patch: DevicePatch) -> Result<()> {
        self.update_calls
            .write()
            .push((device_id.to_string(), patch.clone()));
        let mut devices = self.devices.write();
        let record = devices
            .get_mut(device_id)
            .ok_or_else(|| FleetCertError::DeviceNotFound(device_id.to_string()))?;
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(arn) = patch.identity_arn {
            record.identity_arn = Some(arn);
        }
        if let Some(rotation) = patch.rotation_status {
            record.rotation_status = Some(rotation);
        }
        Ok(())
    }

    async fn list_inherited_policies(
        &self,
        device_id: &str,
        _policy_type: &str,
    ) -> Result<Vec<PolicyDocument>> {
        Ok(self
            .policies
            .read()
            .get(device_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<(String, String), Bytes>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .read()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| FleetCertError::Storage(format!("no such object: {}/{}", bucket, key)))
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), data);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMessageQueue {
    messages: Mutex<Vec<(String, String)>>,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything sent so far, in send order.
    pub fn drain(&self) -> Vec<String> {
        self.messages
            .lock()
            .drain(..)
            .map(|(_, body)| body)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn send(&self, queue_url: &str, body: String) -> Result<()> {
        self.messages
            .lock()
            .push((queue_url.to_string(), body));
        Ok(())
    }
}

/// Conditional-write key-value store. The entry check and insert happen
/// under one lock, matching the insert-if-absent contract.
#[derive(Default)]
pub struct InMemoryLedger {
    records: RwLock<HashMap<CertificateArn, CertificateRenewalRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }
}

#[async_trait]
impl KeyValueLedger for InMemoryLedger {
    async fn get_item(
        &self,
        expiring_certificate_arn: &str,
    ) -> Result<Option<CertificateRenewalRecord>> {
        Ok(self.records.read().get(expiring_certificate_arn).cloned())
    }

    async fn put_item_if_absent(&self, record: CertificateRenewalRecord) -> Result<bool> {
        let mut records = self.records.write();
        if records.contains_key(&record.expiring_certificate_arn) {
            return Ok(false);
        }
        records.insert(record.expiring_certificate_arn.clone(), record);
        Ok(true)
    }
}

pub struct InMemoryAuditFeed {
    findings: RwLock<HashMap<(String, String), Vec<AuditFinding>>>,
    page_size: usize,
}

impl InMemoryAuditFeed {
    pub fn new(page_size: usize) -> Self {
        Self {
            findings: RwLock::new(HashMap::new()),
            page_size,
        }
    }

    pub fn set_findings(&self, check_name: &str, task_id: &str, findings: Vec<AuditFinding>) {
        self.findings
            .write()
            .insert((check_name.to_string(), task_id.to_string()), findings);
    }
}

#[async_trait]
impl AuditFeed for InMemoryAuditFeed {
    async fn list_findings(
        &self,
        check_name: &str,
        task_id: &str,
        page_token: Option<&str>,
    ) -> Result<FindingsPage> {
        let all = self
            .findings
            .read()
            .get(&(check_name.to_string(), task_id.to_string()))
            .cloned()
            .unwrap_or_default();
        let offset: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| FleetCertError::AuditFeed(format!("bad page token: {}", token)))?,
            None => 0,
        };
        let page: Vec<AuditFinding> = all.iter().skip(offset).take(self.page_size).cloned().collect();
        let consumed = offset + page.len();
        let next_token = if consumed < all.len() {
            Some(consumed.to_string())
        } else {
            None
        };
        Ok(FindingsPage {
            findings: page,
            next_token,
        })
    }
}

#[derive(Default)]
pub struct InMemoryProvisioner {
    requests: RwLock<Vec<ProvisioningRequest>>,
}

impl InMemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ProvisioningRequest> {
        self.requests.read().clone()
    }
}

#[async_trait]
impl Provisioner for InMemoryProvisioner {
    async fn provision(&self, request: ProvisioningRequest) -> Result<ProvisionedIdentity> {
        let identity_arn = format!("arn:fleet:identity/{}", request.device_id);
        self.requests.write().push(request);
        Ok(ProvisionedIdentity { identity_arn })
    }
}

#[derive(Default)]
pub struct InMemoryChannelPublisher {
    published: RwLock<Vec<(String, String)>>,
}

impl InMemoryChannelPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.read().clone()
    }

    pub fn on_channel(&self, channel: &str) -> Vec<String> {
        self.published
            .read()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl ChannelPublisher for InMemoryChannelPublisher {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        self.published
            .write()
            .push((channel.to_string(), payload));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryIdentityService {
    known: RwLock<HashMap<DeviceId, DeviceStatus>>,
}

impl InMemoryIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device_id: &str, status: DeviceStatus) {
        self.known.write().insert(device_id.to_string(), status);
    }

    pub fn status(&self, device_id: &str) -> Option<DeviceStatus> {
        self.known.read().get(device_id).copied()
    }
}

#[async_trait]
impl IdentityService for InMemoryIdentityService {
    async fn find_device(&self, device_id: &str) -> Result<bool> {
        Ok(self.known.read().contains_key(device_id))
    }

    async fn set_status(&self, device_id: &str, status: DeviceStatus) -> Result<()> {
        let mut known = self.known.write();
        match known.get_mut(device_id) {
            Some(existing) => {
                *existing = status;
                Ok(())
            }
            None => Err(FleetCertError::DeviceNotFound(device_id.to_string())),
        }
    }
}
