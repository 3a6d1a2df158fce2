//! Atomic single-snapshot persistence for the monitored-domain registry.

pub mod error;
pub mod state;

pub use error::StoreError;
pub use state::StateStore;
