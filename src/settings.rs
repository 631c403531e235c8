//! Daemon settings and configuration
//!
//! Settings come from three layers: built-in defaults, an optional JSON file
//! and command line overrides. They are validated once at startup; any
//! invalid value is a fatal [`Error::Config`].

use crate::lease::LeasePolicy;
use crate::natpmp::{GatewayEndpoint, LeaseRequest, ProtocolSet};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::level_filters::LevelFilter;

/// Default port file location
pub const DEFAULT_PORT_FILE: &str = "/var/run/auto-natpmp/port";

/// Default gateway address
pub const DEFAULT_GATEWAY: &str = "10.2.0.1";

/// NAT-PMP server port, only used to resolve hostnames
const NATPMP_SERVER_PORT: u16 = 5351;

/// Daemon settings
///
/// # Example
/// ```rust,no_run
/// use auto_natpmp::settings::Settings;
///
/// // Load settings (returns default if file doesn't exist)
/// let settings = Settings::load("/etc/auto-natpmp.json").expect("Failed to load");
/// settings.validate().expect("Invalid settings");
/// println!("Gateway: {}", settings.gateway);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Gateway IP address or hostname
    pub gateway: String,
    /// File the current public port is written to
    pub port_file: PathBuf,
    /// Optional log file, in addition to stderr
    pub log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error; WARNING and CRITICAL accepted)
    pub log_level: String,
    /// Protocol helper program
    pub helper: String,
    /// Arguments placed before the helper's own arguments
    pub helper_args: Vec<String>,
    /// Helper timeout in seconds
    pub helper_timeout_secs: u64,
    /// Protocols to map
    pub protocol: ProtocolSet,
    /// Local port to forward to
    pub local_port: u16,
    /// Public port to request (0 = any)
    pub external_port: u16,
    /// Requested lease lifetime in seconds
    pub lifetime_secs: u32,
    /// Fraction of the granted lifetime after which to renew
    pub renew_fraction: f64,
    /// First retry delay in seconds
    pub retry_base_secs: u64,
    /// Maximum retry delay in seconds
    pub retry_max_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gateway: DEFAULT_GATEWAY.to_string(),
            port_file: PathBuf::from(DEFAULT_PORT_FILE),
            log_file: None,
            log_level: "info".to_string(),
            helper: "natpmpc".to_string(),
            helper_args: Vec::new(),
            helper_timeout_secs: 10,
            protocol: ProtocolSet::Udp,
            local_port: 0,
            external_port: 1,
            lifetime_secs: 60,
            renew_fraction: 0.5,
            retry_base_secs: 5,
            retry_max_secs: 60,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    ///
    /// Missing fields take their default. A missing or empty file yields the
    /// defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Save settings to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check every value, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        self.gateway_endpoint()?;
        self.log_level_filter()?;

        if self.helper.trim().is_empty() {
            return Err(Error::Config("helper program must not be empty".to_string()));
        }
        if self.helper_timeout_secs == 0 {
            return Err(Error::Config("helper timeout must be greater than 0".to_string()));
        }
        if self.lifetime_secs == 0 {
            return Err(Error::Config("lifetime must be greater than 0".to_string()));
        }
        if !(self.renew_fraction > 0.0 && self.renew_fraction < 1.0) {
            return Err(Error::Config(format!(
                "renew fraction must be between 0 and 1 (exclusive), got {}",
                self.renew_fraction
            )));
        }
        if self.retry_base_secs == 0 {
            return Err(Error::Config("retry base must be greater than 0".to_string()));
        }
        if self.retry_max_secs < self.retry_base_secs {
            return Err(Error::Config(format!(
                "retry max ({}s) must not be below retry base ({}s)",
                self.retry_max_secs, self.retry_base_secs
            )));
        }

        self.validate_port_file()
    }

    /// Resolve the gateway to an address
    pub fn gateway_endpoint(&self) -> Result<GatewayEndpoint> {
        let host = self.gateway.trim();
        if host.is_empty() {
            return Err(Error::Config("gateway must not be empty".to_string()));
        }

        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(GatewayEndpoint {
                host: host.to_string(),
                addr,
            });
        }

        let addr = (host, NATPMP_SERVER_PORT)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("Cannot resolve gateway '{}': {}", host, e)))?
            .map(|sa| sa.ip())
            .find(IpAddr::is_ipv4)
            .ok_or_else(|| Error::Config(format!("Gateway '{}' has no IPv4 address", host)))?;

        Ok(GatewayEndpoint {
            host: host.to_string(),
            addr,
        })
    }

    /// Parse the configured log level
    pub fn log_level_filter(&self) -> Result<LevelFilter> {
        match self.log_level.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LevelFilter::TRACE),
            "debug" => Ok(LevelFilter::DEBUG),
            "info" => Ok(LevelFilter::INFO),
            "warn" | "warning" => Ok(LevelFilter::WARN),
            "error" | "critical" => Ok(LevelFilter::ERROR),
            "off" => Ok(LevelFilter::OFF),
            other => Err(Error::Config(format!("unknown log level '{}'", other))),
        }
    }

    /// Mapping request built from these settings
    pub fn lease_request(&self) -> LeaseRequest {
        LeaseRequest {
            protocols: self.protocol,
            external_port: self.external_port,
            local_port: self.local_port,
            lifetime_secs: self.lifetime_secs,
        }
    }

    /// Renewal and retry policy built from these settings
    pub fn lease_policy(&self) -> LeasePolicy {
        LeasePolicy {
            renew_fraction: self.renew_fraction,
            retry_base: Duration::from_secs(self.retry_base_secs),
            retry_max: Duration::from_secs(self.retry_max_secs),
        }
    }

    /// Helper timeout as a duration
    pub fn helper_timeout(&self) -> Duration {
        Duration::from_secs(self.helper_timeout_secs)
    }

    fn validate_port_file(&self) -> Result<()> {
        if self.port_file.file_name().is_none() {
            return Err(Error::Config(format!(
                "port file '{}' has no file name",
                self.port_file.display()
            )));
        }

        // Provisioning the directory is up to the installer
        let dir = match self.port_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !dir.is_dir() {
            return Err(Error::Config(format!(
                "port file directory '{}' does not exist",
                dir.display()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tempfile::{NamedTempFile, TempDir};

    fn valid_settings(dir: &TempDir) -> Settings {
        Settings {
            port_file: dir.path().join("port"),
            ..Settings::default()
        }
    }

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();

        assert_eq!(settings.gateway, "10.2.0.1");
        assert_eq!(settings.port_file, PathBuf::from("/var/run/auto-natpmp/port"));
        assert_eq!(settings.helper, "natpmpc");
        assert_eq!(settings.protocol, ProtocolSet::Udp);
        assert_eq!(settings.external_port, 1);
        assert_eq!(settings.local_port, 0);
        assert_eq!(settings.lifetime_secs, 60);
        assert_eq!(settings.renew_fraction, 0.5);
        assert_eq!(settings.retry_base_secs, 5);
        assert_eq!(settings.retry_max_secs, 60);
    }

    #[test]
    fn test_settings_validate_ok() {
        let dir = TempDir::new().unwrap();
        assert!(valid_settings(&dir).validate().is_ok());
    }

    #[test]
    fn test_settings_validate_rejects_bad_values() {
        let dir = TempDir::new().unwrap();
        let base = valid_settings(&dir);

        let cases: Vec<Settings> = vec![
            Settings { gateway: "".to_string(), ..base.clone() },
            Settings { lifetime_secs: 0, ..base.clone() },
            Settings { renew_fraction: 0.0, ..base.clone() },
            Settings { renew_fraction: 1.0, ..base.clone() },
            Settings { renew_fraction: f64::NAN, ..base.clone() },
            Settings { retry_base_secs: 0, ..base.clone() },
            Settings { retry_base_secs: 30, retry_max_secs: 10, ..base.clone() },
            Settings { helper_timeout_secs: 0, ..base.clone() },
            Settings { helper: " ".to_string(), ..base.clone() },
            Settings { log_level: "loud".to_string(), ..base.clone() },
            Settings { port_file: dir.path().join("missing").join("port"), ..base.clone() },
        ];

        for settings in cases {
            assert!(
                matches!(settings.validate(), Err(Error::Config(_))),
                "should reject {:?}",
                settings
            );
        }
    }

    #[test]
    fn test_gateway_endpoint_ip_literal() {
        let settings = Settings::default();
        let endpoint = settings.gateway_endpoint().unwrap();
        assert_eq!(endpoint.addr, IpAddr::V4(Ipv4Addr::new(10, 2, 0, 1)));
        assert_eq!(endpoint.host, "10.2.0.1");
    }

    #[test]
    fn test_gateway_endpoint_resolves_localhost() {
        let settings = Settings {
            gateway: "localhost".to_string(),
            ..Settings::default()
        };
        let endpoint = settings.gateway_endpoint().unwrap();
        assert!(endpoint.addr.is_loopback());
    }

    #[test]
    fn test_log_level_accepts_python_names() {
        let mut settings = Settings::default();
        settings.log_level = "WARNING".to_string();
        assert_eq!(settings.log_level_filter().unwrap(), LevelFilter::WARN);
        settings.log_level = "CRITICAL".to_string();
        assert_eq!(settings.log_level_filter().unwrap(), LevelFilter::ERROR);
    }

    #[test]
    fn test_settings_load_partial_json() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{ "gateway": "192.168.1.1", "protocol": "both", "lifetime_secs": 7200 }"#,
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.gateway, "192.168.1.1");
        assert_eq!(settings.protocol, ProtocolSet::Both);
        assert_eq!(settings.lifetime_secs, 7200);
        // Unspecified fields keep defaults
        assert_eq!(settings.helper, "natpmpc");
    }

    #[test]
    fn test_settings_load_missing_and_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        assert_eq!(Settings::load(&missing).unwrap(), Settings::default());

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "  \n").unwrap();
        assert_eq!(Settings::load(&empty).unwrap(), Settings::default());
    }

    #[test]
    fn test_settings_load_invalid_json() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "{ not json").unwrap();
        assert!(matches!(Settings::load(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_settings_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = valid_settings(&dir);
        settings.helper_args = vec!["exec".to_string(), "vpn".to_string()];
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_lease_policy_from_settings() {
        let settings = Settings {
            renew_fraction: 0.75,
            retry_base_secs: 2,
            retry_max_secs: 120,
            ..Settings::default()
        };
        let policy = settings.lease_policy();
        assert_eq!(policy.renew_fraction, 0.75);
        assert_eq!(policy.retry_base, Duration::from_secs(2));
        assert_eq!(policy.retry_max, Duration::from_secs(120));
    }
}
