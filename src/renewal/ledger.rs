//! Idempotency ledger: the durable, write-once mapping from an expiring
//! certificate to its replacement.
//!
//! The record must be persisted before any retryable side effect so that
//! redeliveries always resolve to the same replacement certificate. The
//! insert is conditional; losing the race means another delivery already
//! issued the replacement, and the loser adopts the winner's record.

use crate::clients::KeyValueLedger;
use crate::error::FleetCertError;
use crate::types::CertificateRenewalRecord;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

pub struct IdempotencyLedger {
    store: Arc<dyn KeyValueLedger>,
}

impl IdempotencyLedger {
    pub fn new(store: Arc<dyn KeyValueLedger>) -> Self {
        Self { store }
    }

    pub async fn find(
        &self,
        expiring_certificate_arn: &str,
    ) -> Result<Option<CertificateRenewalRecord>> {
        self.store.get_item(expiring_certificate_arn).await
    }

    /// Record a freshly issued replacement. Returns the record that is
    /// durably associated with the expiring certificate, which is the
    /// caller's record unless a concurrent delivery won the insert.
    pub async fn record(
        &self,
        record: CertificateRenewalRecord,
    ) -> Result<CertificateRenewalRecord> {
        let key = record.expiring_certificate_arn.clone();
        if self.store.put_item_if_absent(record.clone()).await? {
            return Ok(record);
        }
        debug!(
            expiring_certificate_arn = %key,
            "lost conditional insert, adopting existing renewal record"
        );
        self.store.get_item(&key).await?.ok_or_else(|| {
            FleetCertError::Ledger(format!(
                "conditional insert lost but no record found for {}",
                key
            ))
        })
    }
}
