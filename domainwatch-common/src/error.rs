//! The error taxonomy shared by every domainwatch crate.
//!
//! Each variant corresponds to one kind in the design's error taxonomy:
//! `RATE_TIMEOUT`, `NETWORK`, `PROTOCOL`, `REMOTE_FAILURE`, `AUTH`,
//! `PERSISTENCE`, `FATAL`. Checker- and scheduler-level errors are expected
//! to be downgraded to `CheckOutcome::Inconclusive`/`Error` before they ever
//! reach this type; only errors that cross a component boundary (pipeline
//! to scheduler, scheduler to monitor) are represented here.

use std::io;

use thiserror::Error;

/// The top-level error taxonomy.
#[derive(Debug, Error)]
pub enum DomainWatchError {
    /// A rate-limiter deadline elapsed before tokens became available.
    #[error("rate limit timeout waiting for class {class}")]
    RateTimeout { class: String },

    /// DNS/TCP/HTTP transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// Well-formed transport, but the payload could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Upstream returned a retryable 5xx/429.
    #[error("remote failure ({status}): {message}")]
    RemoteFailure { status: u16, message: String },

    /// Callback API rejected our credentials.
    #[error("authentication rejected by callback API")]
    Auth,

    /// State snapshot read or write failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Invariant violation or unrecoverable configuration; triggers shutdown.
    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DomainWatchError {
    /// Whether this error kind is retried locally rather than surfaced.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateTimeout { .. } | Self::Network(_) | Self::RemoteFailure { .. }
        )
    }

    /// Whether this error should abort the process after a best-effort snapshot.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_timeout_and_network_are_retryable() {
        assert!(DomainWatchError::RateTimeout { class: "dns".into() }.is_retryable());
        assert!(DomainWatchError::Network("refused".into()).is_retryable());
        assert!(DomainWatchError::RemoteFailure { status: 503, message: "busy".into() }
            .is_retryable());
    }

    #[test]
    fn auth_and_protocol_are_not_retryable() {
        assert!(!DomainWatchError::Auth.is_retryable());
        assert!(!DomainWatchError::Protocol("bad json".into()).is_retryable());
    }

    #[test]
    fn only_fatal_is_fatal() {
        assert!(DomainWatchError::Fatal("invariant broken".into()).is_fatal());
        assert!(!DomainWatchError::Auth.is_fatal());
    }
}
