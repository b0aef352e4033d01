//! Harness configuration.
//!
//! Read from the TOML file given as the first argument, or from
//! `~/.config/zerocast/test.toml`. A missing file means defaults.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zerocast_core::{RetryPolicy, ServerConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Instance name for the published services.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Address advertised as a unicast DNS server.
    #[serde(default = "default_dns_server")]
    pub dns_server: IpAddr,

    /// Host name the host-name resolver looks up.
    #[serde(default = "default_resolve_host")]
    pub resolve_host: String,

    /// Address the address resolver looks up.
    #[serde(default = "default_resolve_address")]
    pub resolve_address: IpAddr,

    /// `_http._tcp` instance the service resolver looks up.
    #[serde(default = "default_resolve_service")]
    pub resolve_service: String,

    /// Seconds between record dumps.
    #[serde(default = "default_dump_interval")]
    pub dump_interval_secs: u64,

    /// Seconds before the harness quits (0 = until Ctrl-C).
    #[serde(default = "default_run_time")]
    pub run_time_secs: u64,

    /// Service-name collisions tolerated before giving up (unset = forever).
    #[serde(default)]
    pub max_collision_retries: Option<u32>,

    /// Delay before the first retry after a collision, doubling after that.
    #[serde(default)]
    pub retry_backoff_ms: u64,

    /// Responder settings.
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_service_name() -> String {
    "Test Service".into()
}

fn default_dns_server() -> IpAddr {
    IpAddr::from([192, 168, 50, 1])
}

fn default_resolve_host() -> String {
    "codes-CompUTER.local".into()
}

fn default_resolve_address() -> IpAddr {
    IpAddr::from([192, 168, 50, 15])
}

fn default_resolve_service() -> String {
    "Ecstasy HTTP".into()
}

fn default_dump_interval() -> u64 {
    5
}

fn default_run_time() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            dns_server: default_dns_server(),
            resolve_host: default_resolve_host(),
            resolve_address: default_resolve_address(),
            resolve_service: default_resolve_service(),
            dump_interval_secs: default_dump_interval(),
            run_time_secs: default_run_time(),
            max_collision_retries: None,
            retry_backoff_ms: 0,
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Loads `path`, or the default location when `None`.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path,
            None => config_path(),
        };
        Self::load_from(&path)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.server.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_collision_retries,
            initial_backoff_ms: self.retry_backoff_ms,
            ..RetryPolicy::default()
        }
    }

    pub fn dump_interval(&self) -> Duration {
        Duration::from_secs(self.dump_interval_secs.max(1))
    }

    pub fn run_time(&self) -> Option<Duration> {
        (self.run_time_secs > 0).then(|| Duration::from_secs(self.run_time_secs))
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("zerocast").join("test.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("zerocast")
            .join("test.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "Test Service");
        assert_eq!(config.dns_server, "192.168.50.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.server.domain, "local");
        assert_eq!(config.run_time(), Some(Duration::from_secs(60)));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            service_name = "Box"
            max_collision_retries = 3
            retry_backoff_ms = 100

            [server]
            host_name = "bench"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.service_name, "Box");
        assert_eq!(config.server.host_name.as_deref(), Some("bench"));
        assert_eq!(config.server.service_ttl, 4500);
        assert_eq!(config.dump_interval_secs, 5);

        let policy = config.retry_policy();
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_attempt(4), None);
    }

    #[test]
    fn config_roundtrip_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.toml");

        let config = Config {
            service_name: "SaveTest".into(),
            run_time_secs: 0,
            ..Config::default()
        };
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded.service_name, "SaveTest");
        assert_eq!(loaded.run_time(), None);
    }

    #[test]
    fn missing_file_means_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = Config::load(Some(tmp.path().join("absent.toml"))).unwrap();
        assert_eq!(loaded.service_name, "Test Service");
    }

    #[test]
    fn invalid_server_section_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "[server]\nhost_ttl = 0\n").unwrap();
        assert!(Config::load(Some(path)).is_err());
    }

    #[test]
    fn config_path_not_empty() {
        assert!(config_path().to_string_lossy().contains("zerocast"));
    }
}
