use thiserror::Error;

pub type Result<T> = std::result::Result<T, FleetCertError>;

#[derive(Error, Debug)]
pub enum FleetCertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Certificate error: {0}")]
    Certificate(#[from] rcgen::RcgenError),

    #[error("Certificate parse error: {0}")]
    CertificateParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Revocation list error: {0}")]
    RevocationList(String),

    #[error("Certificate authority error: {0}")]
    Authority(String),

    #[error("Blob storage error: {0}")]
    Storage(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Audit feed error: {0}")]
    AuditFeed(String),

    #[error("Provisioning template not found for device: {0}")]
    ProvisioningTemplateNotFound(String),

    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}
