//! Fan-out message kinds carried on the durable queue.
//!
//! Each message encodes where to resume, which keeps the scanner
//! crash-safe without a checkpoint store: a failed hop is simply
//! redelivered. The `batchType` tag is the single discriminator the
//! consumer switches on.

use crate::types::{CertificateArn, RenewalPair};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "batchType", rename_all = "kebab-case")]
pub enum RenewalMessage {
    /// Resume the audit findings scan at the carried page token.
    #[serde(rename_all = "camelCase")]
    ContinueAuditPage {
        task_id: String,
        page_token: String,
    },
    /// One resolved page of certificates nearing expiry.
    #[serde(rename_all = "camelCase")]
    ExpiringCertificateBatch {
        certificate_arns: Vec<CertificateArn>,
    },
    /// Resume listing devices attached to one certificate.
    #[serde(rename_all = "camelCase")]
    ContinueDevicePage {
        certificate_arn: CertificateArn,
        page_token: String,
    },
    /// (device, certificate) pairs ready for the renewal processor.
    #[serde(rename_all = "camelCase")]
    ReadyForProcessing { pairs: Vec<RenewalPair> },
}

impl RenewalMessage {
    pub fn to_body(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_body(body: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}
