//! Gateway client backed by the external protocol helper
//!
//! Each request runs the helper once per protocol and turns its exit status
//! and output into a [`LeaseOutcome`]. No retries happen here; the lease
//! manager owns the retry policy.
//!
//! # Example
//!
//! ```no_run
//! use auto_natpmp::clock::SystemClock;
//! use auto_natpmp::natpmp::{GatewayClient, GatewayEndpoint, LeaseRequest, NatpmpcClient};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let endpoint = GatewayEndpoint {
//!     host: "10.2.0.1".to_string(),
//!     addr: "10.2.0.1".parse().unwrap(),
//! };
//! let client = NatpmpcClient::new(endpoint, "natpmpc", Duration::from_secs(10), SystemClock);
//! let outcome = client.request(&LeaseRequest::default()).await;
//! println!("{:?}", outcome);
//! # }
//! ```

use super::output::{classify_failure, parse_helper_output, HelperReport};
use super::types::{GatewayEndpoint, Grant, IpProtocol, LeaseOutcome, LeaseRequest, MappingError};
use crate::clock::Clock;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Something that can ask the gateway for a mapping
///
/// Implementations perform exactly one bounded attempt per call.
pub trait GatewayClient {
    /// Request (or refresh) the mapping described by `request`
    fn request(&self, request: &LeaseRequest) -> impl Future<Output = LeaseOutcome> + Send;
}

/// [`GatewayClient`] that shells out to `natpmpc`
#[derive(Debug, Clone)]
pub struct NatpmpcClient<K> {
    endpoint: GatewayEndpoint,
    helper: String,
    leading_args: Vec<String>,
    timeout: Duration,
    clock: K,
}

impl<K: Clock> NatpmpcClient<K> {
    /// Create a client for `endpoint` that runs `helper` with the given timeout
    ///
    /// Grants are stamped with `clock`, which should be the lease manager's.
    pub fn new(endpoint: GatewayEndpoint, helper: impl Into<String>, timeout: Duration, clock: K) -> Self {
        Self {
            endpoint,
            helper: helper.into(),
            leading_args: Vec::new(),
            timeout,
            clock,
        }
    }

    /// Arguments placed before the helper's own arguments
    ///
    /// Useful when `helper` is a wrapper such as `ip netns exec <ns> natpmpc`
    /// or a shell running a script.
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    /// Arguments passed to the helper for one protocol
    pub fn helper_args(&self, request: &LeaseRequest, protocol: IpProtocol) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend([
            "-g".to_string(),
            self.endpoint.addr.to_string(),
            "-a".to_string(),
            request.external_port.to_string(),
            request.local_port.to_string(),
            protocol.as_str().to_string(),
            request.lifetime_secs.to_string(),
        ]);
        args
    }

    /// Run the helper once for a single protocol
    async fn run_helper(
        &self,
        request: &LeaseRequest,
        protocol: IpProtocol,
    ) -> Result<HelperReport, MappingError> {
        let args = self.helper_args(request, protocol);
        debug!("Running command: {} {}", self.helper, args.join(" "));

        let child = Command::new(&self.helper)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MappingError::HelperUnavailable(format!("{}: {}", self.helper, e)))?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                MappingError::HelperUnavailable(format!("waiting for {}: {}", self.helper, e))
            })?,
            Err(_) => return Err(MappingError::Timeout(self.timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            debug!("{} {} failed, stdout: {:?}, stderr: {:?}", self.helper, protocol, stdout, stderr);
            let combined = format!("{}\n{}", stdout, stderr);
            return Err(classify_failure(&combined, &output.status.to_string()));
        }

        parse_helper_output(&stdout).inspect_err(|_| debug!("Full output: {}", stdout))
    }

    async fn request_all(&self, request: &LeaseRequest) -> Result<Grant, MappingError> {
        // Lifetimes count from when the gateway answered the first leg, which
        // is no earlier than this
        let granted_at = self.clock.now();
        let granted_at_utc = self.clock.wall_now();

        let mut primary: Option<HelperReport> = None;
        let mut lifetime_secs = u32::MAX;

        for &protocol in request.protocols.protocols() {
            let report = self.run_helper(request, protocol).await?;
            lifetime_secs = lifetime_secs.min(report.mapping.lifetime_secs);

            match primary.as_ref().map(|first| first.mapping) {
                None => primary = Some(report),
                Some(first) if first.public_port != report.mapping.public_port => warn!(
                    "{} port ({}) does not match {} port ({})",
                    first.protocol,
                    first.public_port,
                    report.mapping.protocol,
                    report.mapping.public_port
                ),
                Some(_) => {}
            }
        }

        let report = primary
            .ok_or_else(|| MappingError::Protocol("no protocol requested".to_string()))?;

        Ok(Grant {
            public_port: report.mapping.public_port,
            lifetime_secs,
            public_ip: report.public_ip,
            granted_at,
            granted_at_utc,
        })
    }
}

impl<K: Clock + Sync> GatewayClient for NatpmpcClient<K> {
    async fn request(&self, request: &LeaseRequest) -> LeaseOutcome {
        info!(
            "Requesting NAT-PMP mapping from {} (external: {}, local: {}, protocols: {:?}, lifetime: {}s)",
            self.endpoint, request.external_port, request.local_port, request.protocols, request.lifetime_secs
        );

        match self.request_all(request).await {
            Ok(grant) => LeaseOutcome::Granted(grant),
            Err(e) => LeaseOutcome::Failed(e),
        }
    }
}
