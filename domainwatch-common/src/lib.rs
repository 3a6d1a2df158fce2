//! Shared types for the domainwatch workspace.
//!
//! This crate carries the domain model (`Domain`, `CheckResult`, `Verdict`),
//! the environment-driven `Config`, the error taxonomy shared by every
//! other crate, the shutdown `Signal` broadcast channel, and the
//! `tracing-subscriber` init used by the `domainwatch` binary.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;

pub use domain::{CheckDetails, CheckOutcome, CheckResult, CheckerKind, Domain, Verdict, VerdictStatus};
pub use error::DomainWatchError;
pub use tracing;

/// Broadcast signal used to coordinate graceful shutdown across long-lived tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
