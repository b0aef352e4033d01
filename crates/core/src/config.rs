//! Server configuration.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::domain;

/// Tunables for a [`Server`](crate::Server).
///
/// Every field has a default, so a partial TOML/JSON document deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host name label to publish; the OS host name when unset.
    #[serde(default)]
    pub host_name: Option<String>,

    /// Domain all local names live under.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Publish A/AAAA and reverse PTR records for `addresses`.
    #[serde(default = "default_true")]
    pub publish_addresses: bool,

    /// Publish an HINFO record for the host.
    #[serde(default = "default_true")]
    pub publish_hinfo: bool,

    /// Host addresses to publish. Filled from the interface monitor by the
    /// embedding application.
    #[serde(default)]
    pub addresses: Vec<IpAddr>,

    /// TTL for host-bound records (addresses, SRV, HINFO), in seconds.
    #[serde(default = "default_host_ttl")]
    pub host_ttl: u32,

    /// TTL for everything else (PTR, TXT), in seconds.
    #[serde(default = "default_service_ttl")]
    pub service_ttl: u32,

    /// Interval between probes, in milliseconds.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Number of probes before a group counts as established.
    #[serde(default = "default_probe_count")]
    pub probe_count: u32,

    /// How long resolvers wait before reporting a timeout, in milliseconds.
    #[serde(default = "default_resolver_timeout_ms")]
    pub resolver_timeout_ms: u64,

    /// Upper bound on cached remote records.
    #[serde(default = "default_cache_entries_max")]
    pub cache_entries_max: usize,
}

fn default_domain() -> String {
    "local".into()
}

fn default_true() -> bool {
    true
}

fn default_host_ttl() -> u32 {
    120
}

fn default_service_ttl() -> u32 {
    4500
}

fn default_probe_interval_ms() -> u64 {
    250
}

fn default_probe_count() -> u32 {
    3
}

fn default_resolver_timeout_ms() -> u64 {
    5000
}

fn default_cache_entries_max() -> usize {
    4096
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host_name: None,
            domain: default_domain(),
            publish_addresses: default_true(),
            publish_hinfo: default_true(),
            addresses: Vec::new(),
            host_ttl: default_host_ttl(),
            service_ttl: default_service_ttl(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_count: default_probe_count(),
            resolver_timeout_ms: default_resolver_timeout_ms(),
            cache_entries_max: default_cache_entries_max(),
        }
    }
}

impl ServerConfig {
    /// Time from commit until an unchallenged group is established.
    pub fn probe_duration(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.saturating_mul(u64::from(self.probe_count)))
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if let Some(name) = &self.host_name
            && !domain::is_valid_host_name(name)
        {
            return Err(Error::InvalidHostName(name.clone()));
        }
        if !domain::is_valid_domain_name(&self.domain) {
            return Err(Error::InvalidDomainName(self.domain.clone()));
        }
        if self.host_ttl == 0 || self.service_ttl == 0 {
            return Err(Error::InvalidConfig("TTLs must be non-zero".into()));
        }
        if self.cache_entries_max == 0 {
            return Err(Error::InvalidConfig("cache_entries_max must be non-zero".into()));
        }
        Ok(())
    }
}

/// Returns the OS host name reduced to a valid single label.
pub fn default_host_name() -> String {
    let raw = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default();
    sanitize_host_name(&raw)
}

/// Keeps the first label of `raw`, truncated to the label limit.
pub(crate) fn sanitize_host_name(raw: &str) -> String {
    let first = raw.trim().split('.').next().unwrap_or_default();
    let mut name = String::new();
    for c in first.chars() {
        if name.len() + c.len_utf8() > domain::LABEL_MAX {
            break;
        }
        name.push(c);
    }
    if name.is_empty() {
        "unknown".into()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.domain, "local");
        assert!(config.publish_addresses);
        assert_eq!(config.probe_duration(), Duration::from_millis(750));
        assert_eq!(config.resolver_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_document_uses_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"host_name": "box"}"#).unwrap();
        assert_eq!(config.host_name.as_deref(), Some("box"));
        assert_eq!(config.host_ttl, 120);
        assert_eq!(config.cache_entries_max, 4096);
    }

    #[test]
    fn validation_rejects_bad_names() {
        let config = ServerConfig {
            host_name: Some("a.b".into()),
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidHostName(_))));

        let config = ServerConfig {
            domain: "bad..domain".into(),
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidDomainName(_))));
    }

    #[test]
    fn sanitize() {
        assert_eq!(sanitize_host_name("box.example.com"), "box");
        assert_eq!(sanitize_host_name(""), "unknown");
        assert_eq!(sanitize_host_name(&"x".repeat(80)).len(), 63);
        assert!(!default_host_name().is_empty());
    }
}
