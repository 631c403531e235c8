//! Common types for NAT-PMP lease requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Upstream gateway, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    /// Host as configured (IP literal or hostname)
    pub host: String,
    /// Address handed to the protocol helper
    pub addr: IpAddr,
}

impl fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host == self.addr.to_string() {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{} ({})", self.host, self.addr)
        }
    }
}

/// IP protocol of a single mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpProtocol {
    /// UDP mapping
    Udp,
    /// TCP mapping
    Tcp,
}

impl IpProtocol {
    /// Name as the helper expects it on its command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which protocols the forwarded port is requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolSet {
    /// UDP only
    #[default]
    Udp,
    /// TCP only
    Tcp,
    /// UDP and TCP on the same public port
    Both,
}

impl ProtocolSet {
    /// Protocols to request, in order. The first one decides the published port.
    pub fn protocols(&self) -> &'static [IpProtocol] {
        match self {
            Self::Udp => &[IpProtocol::Udp],
            Self::Tcp => &[IpProtocol::Tcp],
            Self::Both => &[IpProtocol::Udp, IpProtocol::Tcp],
        }
    }
}

impl std::str::FromStr for ProtocolSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown protocol '{}' (expected udp, tcp or both)", other)),
        }
    }
}

/// Desired mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    /// Protocols to map
    pub protocols: ProtocolSet,
    /// Requested public port (0 = any)
    pub external_port: u16,
    /// Local port the mapping points at
    pub local_port: u16,
    /// Requested lifetime in seconds; the gateway may grant less
    pub lifetime_secs: u32,
}

impl Default for LeaseRequest {
    fn default() -> Self {
        Self {
            protocols: ProtocolSet::Udp,
            external_port: 1,
            local_port: 0,
            lifetime_secs: 60,
        }
    }
}

/// A mapping granted by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    /// Public port opened on the gateway
    pub public_port: u16,
    /// Lifetime the gateway granted, in seconds
    pub lifetime_secs: u32,
    /// Public address of the gateway, when the helper reported it
    pub public_ip: Option<IpAddr>,
    /// When the grant was received (monotonic)
    pub granted_at: Instant,
    /// When the grant was received (wall clock, for logs)
    pub granted_at_utc: DateTime<Utc>,
}

impl Grant {
    /// Granted lifetime as a duration
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(u64::from(self.lifetime_secs))
    }
}

/// Result of one mapping request
#[derive(Debug)]
pub enum LeaseOutcome {
    /// The gateway granted the mapping
    Granted(Grant),
    /// The request failed
    Failed(MappingError),
}

/// Errors that can occur while requesting a mapping
///
/// All of these are transient from the daemon's point of view and are retried.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The helper did not finish within the configured timeout
    #[error("Mapping request timed out after {0:?}")]
    Timeout(Duration),

    /// The gateway could not be reached
    #[error("Gateway unreachable: {0}")]
    GatewayUnreachable(String),

    /// The gateway answered with an error or an unexpected response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The helper's output could not be understood
    #[error("Could not parse helper output: {0}")]
    Parse(String),

    /// The helper could not be started
    #[error("Protocol helper unavailable: {0}")]
    HelperUnavailable(String),
}

impl MappingError {
    /// Short name of the error kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::GatewayUnreachable(_) => "gateway-unreachable",
            Self::Protocol(_) => "protocol-error",
            Self::Parse(_) => "parse-error",
            Self::HelperUnavailable(_) => "helper-unavailable",
        }
    }
}
