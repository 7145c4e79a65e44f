//! Revocation list retrieval.
//!
//! The snapshot is re-fetched from the blob store on every admission check.
//! Revocation is the primary security control, so correctness wins over
//! latency: there is no local cache to invalidate.

use crate::clients::BlobStore;
use crate::config::RevocationConfig;
use crate::error::FleetCertError;
use crate::types::RevocationList;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

pub struct RevocationStoreReader {
    blobs: Arc<dyn BlobStore>,
    config: RevocationConfig,
}

impl RevocationStoreReader {
    pub fn new(blobs: Arc<dyn BlobStore>, config: RevocationConfig) -> Self {
        Self { blobs, config }
    }

    pub async fn fetch(&self) -> Result<RevocationList> {
        let raw = self.blobs.get(&self.config.bucket, &self.config.key).await?;
        let list: RevocationList = serde_json::from_slice(&raw).map_err(|e| {
            FleetCertError::RevocationList(format!(
                "malformed revocation list at {}/{}: {}",
                self.config.bucket, self.config.key, e
            ))
        })?;
        debug!(
            revoked = list.revoked_certificates.len(),
            last_update = %list.last_update,
            "fetched revocation list"
        );
        Ok(list)
    }
}
