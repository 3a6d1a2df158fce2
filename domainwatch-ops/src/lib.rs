//! Operational HTTP surface: health, status, domain listing, manual
//! refresh, and metrics.

mod config;
mod error;
mod registry;
mod server;

pub use config::OpsConfig;
pub use error::OpsError;
pub use registry::{DomainDetail, DomainSummary, RegistryView, StatusSnapshot, VerdictCounts};
pub use server::OpsServer;
