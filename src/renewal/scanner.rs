//! Fleet-wide expiry scanner.
//!
//! Driven by audit notifications, the scanner walks the findings feed one
//! page per invocation and fans work out through the queue. Pagination
//! depth is bounded only by chained invocations, never by an in-process
//! loop, so a mid-page failure is recovered by redelivering the failed
//! message.

use crate::clients::{AuditFeed, CertificateAuthority, MessageQueue};
use crate::config::ScannerConfig;
use crate::renewal::messages::RenewalMessage;
use crate::types::{AuditNotification, CertificateArn, RenewalPair};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub struct FleetRenewalScanner {
    audit: Arc<dyn AuditFeed>,
    authority: Arc<dyn CertificateAuthority>,
    queue: Arc<dyn MessageQueue>,
    config: ScannerConfig,
}

impl FleetRenewalScanner {
    pub fn new(
        audit: Arc<dyn AuditFeed>,
        authority: Arc<dyn CertificateAuthority>,
        queue: Arc<dyn MessageQueue>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            audit,
            authority,
            queue,
            config,
        }
    }

    /// Entry point for the scheduled audit notification. Begins a findings
    /// scan for every non-compliant check matching the expiring-certificate
    /// check name.
    pub async fn handle_notification(&self, notification: &AuditNotification) -> Result<()> {
        if notification.non_compliant_checks_count == 0 {
            debug!(task_id = %notification.task_id, "audit task fully compliant, nothing to scan");
            return Ok(());
        }

        for check in &notification.check_details {
            if check.name == self.config.expiring_check_name && check.non_compliant_count > 0 {
                info!(
                    task_id = %notification.task_id,
                    non_compliant = check.non_compliant_count,
                    "starting expiring-certificate scan"
                );
                self.scan_findings_page(&notification.task_id, None).await?;
            }
        }
        Ok(())
    }

    /// Process exactly one page of audit findings: resolve each finding to
    /// its certificate ARN, emit the batch, and chain the next page through
    /// the queue when there is one.
    pub async fn scan_findings_page(&self, task_id: &str, page_token: Option<&str>) -> Result<()> {
        let page = self
            .audit
            .list_findings(&self.config.expiring_check_name, task_id, page_token)
            .await?;

        // One authority lookup per finding; findings carry ids, the
        // pipeline works in ARNs.
        let mut certificate_arns = Vec::with_capacity(page.findings.len());
        for finding in &page.findings {
            let description = self
                .authority
                .describe_certificate(&finding.certificate_id)
                .await?;
            certificate_arns.push(description.certificate_arn);
        }

        // The feed's own page size is not ours: emitted batches never
        // exceed the configured batch unit.
        for chunk in certificate_arns.chunks(self.config.page_size) {
            self.send(RenewalMessage::ExpiringCertificateBatch {
                certificate_arns: chunk.to_vec(),
            })
            .await?;
        }

        if let Some(token) = page.next_token {
            debug!(task_id, %token, "chaining next audit findings page");
            self.send(RenewalMessage::ContinueAuditPage {
                task_id: task_id.to_string(),
                page_token: token,
            })
            .await?;
        }
        Ok(())
    }

    /// Expand a batch of expiring certificates into per-device work by
    /// starting a device listing for each.
    pub async fn expand_certificate_batch(
        &self,
        certificate_arns: &[CertificateArn],
    ) -> Result<()> {
        for arn in certificate_arns {
            self.scan_device_page(arn, None).await?;
        }
        Ok(())
    }

    /// Process one page of devices attached to one expiring certificate,
    /// emitting a ready message per (device, certificate) pair and chaining
    /// the next device page when present.
    pub async fn scan_device_page(
        &self,
        certificate_arn: &str,
        page_token: Option<&str>,
    ) -> Result<()> {
        let page = self
            .authority
            .list_devices_for_certificate(certificate_arn, page_token)
            .await?;

        for device_id in page.device_ids {
            self.send(RenewalMessage::ReadyForProcessing {
                pairs: vec![RenewalPair {
                    device_id,
                    expiring_certificate_arn: certificate_arn.to_string(),
                }],
            })
            .await?;
        }

        if let Some(token) = page.next_token {
            debug!(certificate_arn, %token, "chaining next device page");
            self.send(RenewalMessage::ContinueDevicePage {
                certificate_arn: certificate_arn.to_string(),
                page_token: token,
            })
            .await?;
        }
        Ok(())
    }

    async fn send(&self, message: RenewalMessage) -> Result<()> {
        self.queue
            .send(&self.config.queue_url, message.to_body()?)
            .await
    }
}
