//! Ops server error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("failed to bind ops server to {address}: {source}")]
    BindError { address: String, source: std::io::Error },

    #[error("ops server error: {0}")]
    ServerError(String),
}
