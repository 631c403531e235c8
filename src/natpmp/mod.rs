//! NAT-PMP gateway access
//!
//! The wire protocol (RFC 6886) is handled by an external helper, `natpmpc`
//! from libnatpmp. This module runs the helper with a bounded timeout and
//! turns what it prints into a structured [`LeaseOutcome`]:
//! - `client` - the [`GatewayClient`] seam and the `natpmpc`-backed client
//! - `output` - parsing and error classification of the helper's output
//! - `types` - requests, grants and errors

pub mod client;
pub mod output;
pub mod types;

pub use client::{GatewayClient, NatpmpcClient};
pub use output::{classify_failure, parse_helper_output, HelperReport, MappedPort};
pub use types::{
    GatewayEndpoint, Grant, IpProtocol, LeaseOutcome, LeaseRequest, MappingError, ProtocolSet,
};
