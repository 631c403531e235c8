//! Parsing of the protocol helper's text output
//!
//! The helper is `natpmpc` from libnatpmp. A successful mapping run prints
//! something like:
//!
//! ```text
//! initnatpmp() returned 0 (SUCCESS)
//! using gateway : 10.2.0.1
//! sendpublicaddressrequest returned 2 (SUCCESS)
//! readnatpmpresponseorretry returned 0 (OK)
//! Public IP address : 198.51.100.7
//! epoch = 1349531
//! sendnewportmappingrequest returned 12 (SUCCESS)
//! readnatpmpresponseorretry returned 0 (OK)
//! Mapped public port 51413 protocol UDP to local port 0 lifetime 60
//! epoch = 1349531
//! closenatpmp() returned 0 (SUCCESS)
//! ```
//!
//! Failures print a negative libnatpmp return code on a `... returned <code>`
//! line and exit with a non-zero status.

use super::types::{IpProtocol, MappingError};
use std::net::IpAddr;

/// Mapping line as reported by the helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedPort {
    /// Public port opened on the gateway
    pub public_port: u16,
    /// Protocol named on the mapping line
    pub protocol: IpProtocol,
    /// Local port the mapping points at
    pub local_port: u16,
    /// Granted lifetime in seconds
    pub lifetime_secs: u32,
}

/// Everything of interest in one successful helper run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperReport {
    /// The granted mapping
    pub mapping: MappedPort,
    /// Gateway public address, if the helper printed it
    pub public_ip: Option<IpAddr>,
}

/// libnatpmp return codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub(crate) enum NatpmpcCode {
    InvalidArgs = -1,
    SocketError = -2,
    CannotGetGateway = -3,
    CloseError = -4,
    RecvFrom = -5,
    NoPendingRequest = -6,
    NoGatewaySupport = -7,
    ConnectError = -8,
    WrongPacketSource = -9,
    SendError = -10,
    FcntlError = -11,
    GetTimeOfDayError = -12,
    UnsupportedVersion = -14,
    UnsupportedOpcode = -15,
    UndefinedError = -49,
    NotAuthorized = -51,
    NetworkFailure = -52,
    OutOfResources = -53,
    TryAgain = -100,
}

impl NatpmpcCode {
    pub(crate) fn from_i32(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::InvalidArgs),
            -2 => Some(Self::SocketError),
            -3 => Some(Self::CannotGetGateway),
            -4 => Some(Self::CloseError),
            -5 => Some(Self::RecvFrom),
            -6 => Some(Self::NoPendingRequest),
            -7 => Some(Self::NoGatewaySupport),
            -8 => Some(Self::ConnectError),
            -9 => Some(Self::WrongPacketSource),
            -10 => Some(Self::SendError),
            -11 => Some(Self::FcntlError),
            -12 => Some(Self::GetTimeOfDayError),
            -14 => Some(Self::UnsupportedVersion),
            -15 => Some(Self::UnsupportedOpcode),
            -49 => Some(Self::UndefinedError),
            -51 => Some(Self::NotAuthorized),
            -52 => Some(Self::NetworkFailure),
            -53 => Some(Self::OutOfResources),
            -100 => Some(Self::TryAgain),
            _ => None,
        }
    }

    pub(crate) fn to_error_message(&self) -> &'static str {
        match self {
            Self::InvalidArgs => "Invalid arguments",
            Self::SocketError => "Socket error",
            Self::CannotGetGateway => "Cannot get default gateway",
            Self::CloseError => "Close error",
            Self::RecvFrom => "No response from gateway (recvfrom)",
            Self::NoPendingRequest => "No pending request",
            Self::NoGatewaySupport => "Gateway does not support NAT-PMP",
            Self::ConnectError => "Connect error",
            Self::WrongPacketSource => "Packet from unexpected source",
            Self::SendError => "Send error",
            Self::FcntlError => "fcntl error",
            Self::GetTimeOfDayError => "gettimeofday error",
            Self::UnsupportedVersion => "Unsupported NAT-PMP version",
            Self::UnsupportedOpcode => "Unsupported opcode",
            Self::UndefinedError => "Undefined gateway error",
            Self::NotAuthorized => "Not authorized/refused",
            Self::NetworkFailure => "Network failure",
            Self::OutOfResources => "Out of resources",
            Self::TryAgain => "Try again",
        }
    }

    /// Whether the code means the gateway could not be talked to at all
    pub(crate) fn is_reachability_failure(&self) -> bool {
        matches!(
            self,
            Self::SocketError
                | Self::CannotGetGateway
                | Self::RecvFrom
                | Self::NoGatewaySupport
                | Self::ConnectError
                | Self::WrongPacketSource
                | Self::SendError
                | Self::TryAgain
        )
    }

    pub(crate) fn into_error(self) -> MappingError {
        let message = format!("{} ({})", self.to_error_message(), self as i32);
        if self.is_reachability_failure() {
            MappingError::GatewayUnreachable(message)
        } else {
            MappingError::Protocol(message)
        }
    }
}

/// Parse the output of a successful helper run
pub fn parse_helper_output(output: &str) -> Result<HelperReport, MappingError> {
    let mapping = output
        .lines()
        .find_map(parse_mapped_line)
        .transpose()?
        .ok_or_else(|| MappingError::Parse("no 'Mapped public port' line in output".to_string()))?;

    if mapping.lifetime_secs == 0 {
        return Err(MappingError::Parse(format!(
            "gateway granted port {} with zero lifetime",
            mapping.public_port
        )));
    }

    let public_ip = output.lines().find_map(parse_public_ip_line);

    Ok(HelperReport { mapping, public_ip })
}

/// Classify a failed helper run from whatever it printed
pub fn classify_failure(output: &str, status: &str) -> MappingError {
    let code = output
        .lines()
        .filter_map(parse_return_code)
        .find(|code| *code < 0);

    match code.map(|c| (c, NatpmpcCode::from_i32(c))) {
        Some((_, Some(known))) => known.into_error(),
        Some((raw, None)) => MappingError::Protocol(format!("helper returned code {}", raw)),
        None => MappingError::GatewayUnreachable(format!("helper exited with {}", status)),
    }
}

/// `Mapped public port <p> protocol <UDP|TCP> to local port <l> lifetime <s>`
fn parse_mapped_line(line: &str) -> Option<Result<MappedPort, MappingError>> {
    let rest = line.trim().strip_prefix("Mapped public port")?;
    let words: Vec<&str> = rest.split_whitespace().collect();

    let parse = || -> Result<MappedPort, MappingError> {
        let malformed = || MappingError::Parse(format!("malformed mapping line: {}", line.trim()));

        let public_port = words.first().and_then(|w| w.parse::<u16>().ok()).ok_or_else(malformed)?;

        let protocol = word_after(&words, "protocol")
            .and_then(|w| match w.to_ascii_lowercase().as_str() {
                "udp" => Some(IpProtocol::Udp),
                "tcp" => Some(IpProtocol::Tcp),
                _ => None,
            })
            .ok_or_else(malformed)?;

        let local_port = word_after(&words, "port")
            .and_then(|w| w.parse::<u16>().ok())
            .ok_or_else(malformed)?;

        let lifetime_secs = word_after(&words, "lifetime")
            .and_then(|w| w.parse::<u32>().ok())
            .ok_or_else(malformed)?;

        Ok(MappedPort {
            public_port,
            protocol,
            local_port,
            lifetime_secs,
        })
    };

    Some(parse())
}

/// `Public IP address : <ip>`
fn parse_public_ip_line(line: &str) -> Option<IpAddr> {
    let rest = line.trim().strip_prefix("Public IP address")?;
    let (_, value) = rest.split_once(':')?;
    value.trim().parse().ok()
}

/// `<call> returned <code> (<text>)`
fn parse_return_code(line: &str) -> Option<i32> {
    let (_, rest) = line.split_once(" returned ")?;
    rest.split_whitespace().next()?.parse().ok()
}

fn word_after<'a>(words: &[&'a str], key: &str) -> Option<&'a str> {
    words
        .iter()
        .position(|w| *w == key)
        .and_then(|i| words.get(i + 1).copied())
}
