//! Renewal processor: turns a ready (device, certificate) pair into an
//! issued, archived, policy-equivalent replacement certificate.
//!
//! Deliveries are at-least-once and unordered, so every mutating step is
//! either ledger-guarded or individually retryable. The ledger write
//! happens before policy copy and device attachment; a retry after a
//! partial failure resolves to the already-issued replacement.

use crate::clients::{
    BlobStore, CertificateAuthority, DeviceRegistry, IssueCertificateRequest,
};
use crate::config::RenewalConfig;
use crate::renewal::ledger::IdempotencyLedger;
use crate::types::{CertificateRenewalRecord, DeviceStatus, RenewalPair};
use crate::Result;
use bytes::Bytes;
use chrono::{Datelike, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Per-batch result counters. Failures never abort sibling items.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingSummary {
    pub renewed: usize,
    pub reused: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug)]
enum PairOutcome {
    Renewed { reused: bool },
    SkippedInactive,
}

pub struct RenewalProcessor {
    registry: Arc<dyn DeviceRegistry>,
    authority: Arc<dyn CertificateAuthority>,
    ledger: IdempotencyLedger,
    blobs: Arc<dyn BlobStore>,
    config: RenewalConfig,
}

impl RenewalProcessor {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        authority: Arc<dyn CertificateAuthority>,
        ledger: IdempotencyLedger,
        blobs: Arc<dyn BlobStore>,
        config: RenewalConfig,
    ) -> Self {
        Self {
            registry,
            authority,
            ledger,
            blobs,
            config,
        }
    }

    /// Process every pair in the batch independently. One item's failure
    /// must not prevent its siblings from completing.
    pub async fn process(&self, pairs: &[RenewalPair]) -> ProcessingSummary {
        let mut summary = ProcessingSummary::default();
        for pair in pairs {
            match self.renew_pair(pair).await {
                Ok(PairOutcome::Renewed { reused: false }) => summary.renewed += 1,
                Ok(PairOutcome::Renewed { reused: true }) => summary.reused += 1,
                Ok(PairOutcome::SkippedInactive) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        device_id = %pair.device_id,
                        expiring_certificate_arn = %pair.expiring_certificate_arn,
                        error = %e,
                        "renewal failed for pair"
                    );
                }
            }
        }
        info!(
            renewed = summary.renewed,
            reused = summary.reused,
            skipped = summary.skipped,
            failed = summary.failed,
            "renewal batch processed"
        );
        summary
    }

    async fn renew_pair(&self, pair: &RenewalPair) -> Result<PairOutcome> {
        // 1. Inactive devices are skipped, not failed.
        let device = self.registry.get_device(&pair.device_id).await?;
        let active = matches!(
            device,
            Some(ref record) if record.status == DeviceStatus::Active
        );
        if !active {
            warn!(
                device_id = %pair.device_id,
                "device absent or inactive, skipping renewal"
            );
            return Ok(PairOutcome::SkippedInactive);
        }

        // 2. Ledger-guarded issuance. The record is durable before any of
        // the retryable side effects below.
        let existing = self.ledger.find(&pair.expiring_certificate_arn).await?;
        let reused = existing.is_some();
        let record = match existing {
            Some(record) => {
                info!(
                    expiring_certificate_arn = %pair.expiring_certificate_arn,
                    renewed_certificate_id = %record.renewed_certificate_id,
                    "reusing previously issued replacement"
                );
                record
            }
            None => {
                let issued = self
                    .authority
                    .issue_certificate(IssueCertificateRequest {
                        device_id: pair.device_id.clone(),
                        set_active: true,
                    })
                    .await?;
                self.ledger
                    .record(CertificateRenewalRecord {
                        expiring_certificate_arn: pair.expiring_certificate_arn.clone(),
                        thing_name: pair.device_id.clone(),
                        renewed_certificate_arn: issued.certificate_arn,
                        renewed_certificate_id: issued.certificate_id,
                        renewed_certificate_pem: issued.certificate_pem,
                    })
                    .await?
            }
        };

        // 3. Archive the replacement PEM under a date-partitioned key.
        let key = archive_key(&record.renewed_certificate_id);
        self.blobs
            .put(
                &self.config.archive_bucket,
                &key,
                Bytes::from(record.renewed_certificate_pem.clone()),
            )
            .await?;

        // 4. Copy authorization policies from the expiring certificate.
        let policies = self
            .authority
            .list_attached_policies(&pair.expiring_certificate_arn)
            .await?;
        for policy_name in &policies {
            self.authority
                .attach_policy(&record.renewed_certificate_arn, policy_name)
                .await?;
        }

        // 5. Re-associate the device identity.
        self.authority
            .attach_to_device(&record.renewed_certificate_arn, &pair.device_id)
            .await?;

        info!(
            device_id = %pair.device_id,
            expiring_certificate_arn = %pair.expiring_certificate_arn,
            renewed_certificate_id = %record.renewed_certificate_id,
            policies = policies.len(),
            "certificate renewed"
        );
        Ok(PairOutcome::Renewed { reused })
    }
}

/// `YYYY/M/D/{certificateId}.pem`, month and day unpadded.
fn archive_key(certificate_id: &str) -> String {
    let today = Utc::now().date_naive();
    format!(
        "{}/{}/{}/{}.pem",
        today.year(),
        today.month(),
        today.day(),
        certificate_id
    )
}
