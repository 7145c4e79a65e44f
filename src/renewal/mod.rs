//! Fleet renewal pipeline: expiry scanning, queue fan-out, and idempotent
//! replacement issuance.

pub mod ledger;
pub mod messages;
pub mod processor;
pub mod scanner;

pub use ledger::IdempotencyLedger;
pub use messages::RenewalMessage;
pub use processor::{ProcessingSummary, RenewalProcessor};
pub use scanner::FleetRenewalScanner;

use crate::Result;
use tracing::debug;

/// Queue consumer entry point. One switch over the message discriminator
/// routes each of the four kinds to the scanner or the processor.
pub struct RenewalPipeline {
    scanner: FleetRenewalScanner,
    processor: RenewalProcessor,
}

impl RenewalPipeline {
    pub fn new(scanner: FleetRenewalScanner, processor: RenewalProcessor) -> Self {
        Self { scanner, processor }
    }

    pub fn scanner(&self) -> &FleetRenewalScanner {
        &self.scanner
    }

    pub fn processor(&self) -> &RenewalProcessor {
        &self.processor
    }

    pub async fn handle_body(&self, body: &str) -> Result<()> {
        self.handle_message(RenewalMessage::from_body(body)?).await
    }

    pub async fn handle_message(&self, message: RenewalMessage) -> Result<()> {
        debug!(?message, "dispatching renewal message");
        match message {
            RenewalMessage::ContinueAuditPage {
                task_id,
                page_token,
            } => {
                self.scanner
                    .scan_findings_page(&task_id, Some(&page_token))
                    .await
            }
            RenewalMessage::ExpiringCertificateBatch { certificate_arns } => {
                self.scanner
                    .expand_certificate_batch(&certificate_arns)
                    .await
            }
            RenewalMessage::ContinueDevicePage {
                certificate_arn,
                page_token,
            } => {
                self.scanner
                    .scan_device_page(&certificate_arn, Some(&page_token))
                    .await
            }
            RenewalMessage::ReadyForProcessing { pairs } => {
                // Per-item failures are already isolated and logged by the
                // processor; the message itself succeeds.
                self.processor.process(&pairs).await;
                Ok(())
            }
        }
    }
}
