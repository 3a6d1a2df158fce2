//! Ops server configuration.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct OpsConfig {
    /// Disabling the ops server is mainly useful in tests.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

const fn default_enabled() -> bool {
    true
}

fn default_listen_address() -> String {
    "[::]:8080".to_string()
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self { enabled: default_enabled(), listen_address: default_listen_address() }
    }
}
