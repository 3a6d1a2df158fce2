//! Environment-driven configuration, with an optional `.toml` override
//! layer for local development.
//!
//! Every field has a default except the two callback/list URLs, which are
//! required. Resolution order per field is env var, then the override
//! file, then the built-in default (or a `Missing` error for the required
//! fields) — environment variables always win so a deployed process can't
//! be silently redirected by a stray file in its working directory.
//!
//! The file itself is read the same way `Server::from_config` reads
//! `empath-server`'s TOML manifest: the whole file slurped into a
//! `String`, then handed to `toml::from_str`. Unlike `Server::from_config`
//! this file is optional — its absence is not an error, since most
//! deployments configure purely through the environment.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "domainwatch.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("could not read config file {path}: {source}")]
    FileUnreadable { path: String, source: std::io::Error },
    #[error("could not parse config file {path}: {source}")]
    FileInvalid { path: String, source: toml::de::Error },
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_callback_url: String,
    pub api_auth_token: String,
    pub domain_api_url: String,
    pub domain_api_refresh_interval: Duration,
    pub instance_id: String,
    pub state_dir: String,
    pub rate_dns_per_sec: f64,
    pub rate_http_per_sec: f64,
    pub rate_rdap_per_sec: f64,
    pub rate_whois_per_sec: f64,
    pub rate_list_api_per_sec: f64,
    pub rate_callback_api_per_sec: f64,
    pub workers: usize,
    pub t_low: Duration,
    pub t_high: Duration,
    pub t_confirmed: Duration,
    pub t_cap: Duration,
    pub ops_listen_addr: String,
    pub ops_enabled: bool,
    pub shutdown_grace: Duration,
}

/// Optional `domainwatch.toml` overlay. Every field is optional since the
/// file itself is optional and a developer only needs to set the handful
/// of values they're overriding.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    api_callback_url: Option<String>,
    api_auth_token: Option<String>,
    domain_api_url: Option<String>,
    domain_api_refresh_interval_secs: Option<u64>,
    instance_id: Option<String>,
    state_dir: Option<String>,
    rate_dns_per_sec: Option<f64>,
    rate_http_per_sec: Option<f64>,
    rate_rdap_per_sec: Option<f64>,
    rate_whois_per_sec: Option<f64>,
    rate_list_api_per_sec: Option<f64>,
    rate_callback_api_per_sec: Option<f64>,
    workers: Option<usize>,
    t_low_secs: Option<u64>,
    t_high_secs: Option<u64>,
    t_confirmed_secs: Option<u64>,
    t_cap_secs: Option<u64>,
    ops_listen_addr: Option<String>,
    ops_enabled: Option<bool>,
    shutdown_grace_secs: Option<u64>,
}

impl ConfigFile {
    /// Loads `DOMAINWATCH_CONFIG_FILE` (default `domainwatch.toml`) if it
    /// exists. A missing file is not an error; an unreadable or malformed
    /// one is.
    fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("DOMAINWATCH_CONFIG_FILE")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ConfigError::FileUnreadable { path, source: err }),
        };

        toml::from_str(&contents).map_err(|err| ConfigError::FileInvalid { path, source: err })
    }
}

fn resolve_required(name: &'static str, file_value: Option<String>) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) => Ok(value),
        Err(_) => file_value.ok_or(ConfigError::Missing(name)),
    }
}

fn resolve_string(name: &'static str, file_value: Option<String>, default: &str) -> String {
    std::env::var(name).ok().or(file_value).unwrap_or_else(|| default.to_string())
}

fn resolve<T: std::str::FromStr>(
    name: &'static str,
    file_value: Option<T>,
    default: T,
) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(file_value.unwrap_or(default)),
    }
}

impl Config {
    /// Loads configuration from the process environment, falling back to
    /// an optional `.toml` override file and then to built-in defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` if a required value is missing from both the
    /// environment and the override file, a numeric variable fails to
    /// parse, or the override file exists but can't be read or parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = ConfigFile::load()?;

        Ok(Self {
            api_callback_url: resolve_required("API_CALLBACK_URL", file.api_callback_url)?,
            api_auth_token: resolve_required("API_AUTH_TOKEN", file.api_auth_token)?,
            domain_api_url: resolve_required("DOMAIN_API_URL", file.domain_api_url)?,
            domain_api_refresh_interval: Duration::from_secs(resolve(
                "DOMAIN_API_REFRESH_INTERVAL",
                file.domain_api_refresh_interval_secs,
                300,
            )?),
            instance_id: resolve_string("INSTANCE_ID", file.instance_id, "domainwatch"),
            state_dir: resolve_string("STATE_DIR", file.state_dir, "./state"),
            rate_dns_per_sec: resolve("RATE_DNS_PER_SEC", file.rate_dns_per_sec, 20.0)?,
            rate_http_per_sec: resolve("RATE_HTTP_PER_SEC", file.rate_http_per_sec, 20.0)?,
            rate_rdap_per_sec: resolve("RATE_RDAP_PER_SEC", file.rate_rdap_per_sec, 5.0)?,
            rate_whois_per_sec: resolve("RATE_WHOIS_PER_SEC", file.rate_whois_per_sec, 2.0)?,
            rate_list_api_per_sec: resolve("RATE_LIST_API_PER_SEC", file.rate_list_api_per_sec, 1.0)?,
            rate_callback_api_per_sec: resolve(
                "RATE_CALLBACK_API_PER_SEC",
                file.rate_callback_api_per_sec,
                10.0,
            )?,
            workers: resolve("WORKERS", file.workers, 8)?,
            t_low: Duration::from_secs(resolve("T_LOW", file.t_low_secs, 3600)?),
            t_high: Duration::from_secs(resolve("T_HIGH", file.t_high_secs, 300)?),
            t_confirmed: Duration::from_secs(resolve("T_CONFIRMED", file.t_confirmed_secs, 14400)?),
            t_cap: Duration::from_secs(resolve("T_CAP", file.t_cap_secs, 86400)?),
            ops_listen_addr: resolve_string("OPS_LISTEN_ADDR", file.ops_listen_addr, "0.0.0.0:8090"),
            ops_enabled: resolve("OPS_ENABLED", file.ops_enabled, true)?,
            shutdown_grace: Duration::from_secs(resolve(
                "SHUTDOWN_GRACE_SECS",
                file.shutdown_grace_secs,
                30,
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_required_env<F: FnOnce()>(f: F) {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("API_CALLBACK_URL", "https://callback.example/api");
            std::env::set_var("API_AUTH_TOKEN", "secret");
            std::env::set_var("DOMAIN_API_URL", "https://list.example/api");
        }
        f();
        unsafe {
            std::env::remove_var("API_CALLBACK_URL");
            std::env::remove_var("API_AUTH_TOKEN");
            std::env::remove_var("DOMAIN_API_URL");
            std::env::remove_var("WORKERS");
            std::env::remove_var("DOMAINWATCH_CONFIG_FILE");
        }
    }

    #[test]
    fn missing_required_var_errors() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::remove_var("API_CALLBACK_URL");
            std::env::remove_var("DOMAINWATCH_CONFIG_FILE");
        }
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("API_CALLBACK_URL")));
    }

    #[test]
    fn defaults_fill_in_when_optional_vars_absent() {
        with_required_env(|| {
            let cfg = Config::from_env().expect("should load");
            assert_eq!(cfg.workers, 8);
            assert_eq!(cfg.t_low, Duration::from_secs(3600));
            assert_eq!(cfg.t_high, Duration::from_secs(300));
        });
    }

    #[test]
    fn invalid_numeric_override_errors() {
        with_required_env(|| {
            unsafe {
                std::env::set_var("WORKERS", "not-a-number");
            }
            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { name: "WORKERS", .. }));
        });
    }

    #[test]
    fn override_file_fills_required_fields_when_env_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = std::env::temp_dir().join(format!(
            "domainwatch-config-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("domainwatch.toml");
        std::fs::write(
            &path,
            r#"
            api_callback_url = "https://callback.example/api"
            api_auth_token = "secret"
            domain_api_url = "https://list.example/api"
            workers = 4
            "#,
        )
        .unwrap();

        unsafe {
            std::env::remove_var("API_CALLBACK_URL");
            std::env::remove_var("API_AUTH_TOKEN");
            std::env::remove_var("DOMAIN_API_URL");
            std::env::remove_var("WORKERS");
            std::env::set_var("DOMAINWATCH_CONFIG_FILE", &path);
        }

        let cfg = Config::from_env().expect("should load from file");
        assert_eq!(cfg.api_callback_url, "https://callback.example/api");
        assert_eq!(cfg.workers, 4);

        unsafe {
            std::env::remove_var("DOMAINWATCH_CONFIG_FILE");
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn env_var_wins_over_override_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = std::env::temp_dir().join(format!(
            "domainwatch-config-test-precedence-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("domainwatch.toml");
        std::fs::write(&path, "workers = 2\n").unwrap();

        unsafe {
            std::env::set_var("API_CALLBACK_URL", "https://callback.example/api");
            std::env::set_var("API_AUTH_TOKEN", "secret");
            std::env::set_var("DOMAIN_API_URL", "https://list.example/api");
            std::env::set_var("WORKERS", "16");
            std::env::set_var("DOMAINWATCH_CONFIG_FILE", &path);
        }

        let cfg = Config::from_env().expect("should load");
        assert_eq!(cfg.workers, 16);

        unsafe {
            std::env::remove_var("API_CALLBACK_URL");
            std::env::remove_var("API_AUTH_TOKEN");
            std::env::remove_var("DOMAIN_API_URL");
            std::env::remove_var("WORKERS");
            std::env::remove_var("DOMAINWATCH_CONFIG_FILE");
        }
        std::fs::remove_dir_all(&dir).ok();
    }
}
