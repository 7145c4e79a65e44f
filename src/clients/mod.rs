//! Collaborator boundary: abstract contracts for the external services this
//! subsystem consumes (device registry, certificate authority, blob store,
//! durable queue, key-value ledger, audit feed, provisioning, channels) plus
//! in-process implementations of each for local use and tests.

pub mod memory;
pub mod traits;

pub use traits::{
    AuditFeed, BlobStore, CertificateAuthority, ChannelPublisher, DeviceRegistry, IdentityService,
    IssueCertificateRequest, KeyValueLedger, MessageQueue, ProvisionedIdentity, Provisioner,
    ProvisioningRequest,
};
