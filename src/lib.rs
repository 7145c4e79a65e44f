//! FleetCert: device fleet X.509 certificate lifecycle orchestration.
//!
//! Three independent entry points share a set of abstract collaborators:
//!
//! - **Admission** ([`admission::AdmissionValidator`]): validates a
//!   just-in-time registered certificate against the revocation list and
//!   the device whitelist, then activates or revokes it.
//! - **Fleet renewal** ([`renewal::RenewalPipeline`]): a scanner walks
//!   audit findings for certificates nearing expiry and fans work out over
//!   a durable queue; the processor issues replacements with exactly-once
//!   semantics guarded by the idempotency ledger.
//! - **Device rotation** ([`rotation::DeviceRotationHandler`]): a
//!   request/acknowledge protocol letting a connected device obtain a new
//!   certificate (optionally via CSR) and retire its predecessor.
//!
//! Units of work are stateless, short-lived tasks; concurrency comes from
//! horizontal fan-out of invocations, not threads within one.

pub mod admission;
pub mod clients;
pub mod config;
pub mod error;
pub mod gate;
pub mod renewal;
pub mod revocation;
pub mod rotation;
pub mod types;

pub use config::Config;
pub use error::{FleetCertError, Result};
