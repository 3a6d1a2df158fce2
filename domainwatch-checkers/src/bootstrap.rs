//! TLD → service-endpoint bootstrap tables for RDAP and WHOIS.
//!
//! RDAP bootstrapping follows IANA's published service registry
//! (`https://data.iana.org/rdap/dns.json`), fetched once and cached for the
//! process lifetime. WHOIS has no such machine-readable registry; this
//! module keeps a small table of well-known per-TLD servers and falls back
//! to asking `whois.iana.org` for a `refer:` line, which is how most WHOIS
//! clients bootstrap an unlisted TLD.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, warn};

pub const IANA_WHOIS_SERVER: &str = "whois.iana.org";
const IANA_BOOTSTRAP_URL: &str = "https://data.iana.org/rdap/dns.json";

#[derive(Debug, Deserialize)]
struct IanaBootstrapFile {
    services: Vec<(Vec<String>, Vec<String>)>,
}

/// Resolves a TLD to its RDAP base URL via the IANA bootstrap registry.
pub struct RdapBootstrap {
    client: reqwest::Client,
    table: OnceLock<HashMap<String, String>>,
}

impl RdapBootstrap {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, table: OnceLock::new() }
    }

    /// Returns the RDAP base URL for `tld` (lowercase, no leading dot), or
    /// `None` if the registry has no entry for it.
    pub async fn base_for_tld(&self, tld: &str, timeout: Duration) -> Option<String> {
        if self.table.get().is_none() {
            if let Some(table) = self.fetch(timeout).await {
                let _ = self.table.set(table);
            }
        }
        self.table.get().and_then(|t| t.get(tld)).cloned()
    }

    async fn fetch(&self, timeout: Duration) -> Option<HashMap<String, String>> {
        let resp = tokio::time::timeout(timeout, self.client.get(IANA_BOOTSTRAP_URL).send())
            .await
            .ok()?
            .ok()?;
        let body: IanaBootstrapFile = resp.json().await.ok()?;
        let mut table = HashMap::new();
        for (tlds, urls) in body.services {
            let Some(base) = urls.into_iter().find(|u| u.starts_with("https://")) else {
                continue;
            };
            for tld in tlds {
                table.insert(tld.to_ascii_lowercase(), base.trim_end_matches('/').to_string());
            }
        }
        debug!(entries = table.len(), "loaded IANA RDAP bootstrap registry");
        Some(table)
    }
}

/// Well-known per-TLD WHOIS servers, checked before falling back to the
/// `whois.iana.org` referral.
static KNOWN_WHOIS_SERVERS: &[(&str, &str)] = &[
    ("com", "whois.verisign-grs.com"),
    ("net", "whois.verisign-grs.com"),
    ("org", "whois.pir.org"),
    ("info", "whois.afilias.net"),
    ("io", "whois.nic.io"),
    ("co", "whois.nic.co"),
    ("dev", "whois.nic.google"),
    ("app", "whois.nic.google"),
    ("me", "whois.nic.me"),
    ("uk", "whois.nic.uk"),
    ("de", "whois.denic.de"),
    ("nl", "whois.domain-registry.nl"),
    ("ai", "whois.nic.ai"),
];

/// In-memory cache of TLD → WHOIS server, seeded from the known table and
/// extended as `whois.iana.org` referrals are resolved.
pub struct WhoisBootstrap {
    cache: DashMap<String, String>,
}

impl Default for WhoisBootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl WhoisBootstrap {
    #[must_use]
    pub fn new() -> Self {
        let cache = DashMap::new();
        for (tld, server) in KNOWN_WHOIS_SERVERS {
            cache.insert((*tld).to_string(), (*server).to_string());
        }
        Self { cache }
    }

    #[must_use]
    pub fn lookup(&self, tld: &str) -> Option<String> {
        self.cache.get(tld).map(|v| v.clone())
    }

    pub fn remember(&self, tld: &str, server: String) {
        self.cache.insert(tld.to_string(), server);
    }
}

/// Extracts the `refer:` server hostname from a `whois.iana.org` response.
#[must_use]
pub fn parse_iana_referral(response: &str) -> Option<String> {
    for line in response.lines() {
        if let Some(rest) = line.strip_prefix("refer:") {
            let server = rest.trim();
            if !server.is_empty() {
                return Some(server.to_string());
            }
        }
    }
    warn!("no refer: line in whois.iana.org response");
    None
}

#[must_use]
pub fn tld_of(domain: &str) -> Option<&str> {
    domain.rsplit('.').next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_table_resolves_com() {
        let boot = WhoisBootstrap::new();
        assert_eq!(boot.lookup("com"), Some("whois.verisign-grs.com".to_string()));
    }

    #[test]
    fn unknown_tld_is_absent_until_remembered() {
        let boot = WhoisBootstrap::new();
        assert_eq!(boot.lookup("zz"), None);
        boot.remember("zz", "whois.nic.zz".to_string());
        assert_eq!(boot.lookup("zz"), Some("whois.nic.zz".to_string()));
    }

    #[test]
    fn parses_refer_line() {
        let resp = "% IANA WHOIS server\nrefer:        whois.nic.example\n\ndomain: EXAMPLE\n";
        assert_eq!(parse_iana_referral(resp), Some("whois.nic.example".to_string()));
    }

    #[test]
    fn missing_refer_line_is_none() {
        let resp = "% IANA WHOIS server\n\ndomain: EXAMPLE\n";
        assert_eq!(parse_iana_referral(resp), None);
    }

    #[test]
    fn tld_of_extracts_last_label() {
        assert_eq!(tld_of("example.com"), Some("com"));
        assert_eq!(tld_of("sub.example.co.uk"), Some("uk"));
    }
}
