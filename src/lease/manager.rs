//! Lease manager - the renewal state machine
//!
//! The manager requests a mapping, publishes the granted port, sleeps until
//! the renewal time and renews. Failures are retried forever with capped
//! exponential backoff. A port that was already published stays published
//! while its lease has not expired, even if renewals keep failing, because
//! the gateway may still be honoring the mapping.
//!
//! The manager is driven one [`LeaseManager::step`] at a time. [`LeaseManager::run`]
//! wraps that in a timer loop that a shutdown future can interrupt at any
//! point.

use super::policy::LeasePolicy;
use super::state::{ActiveLease, LeaseState};
use crate::clock::Clock;
use crate::natpmp::{GatewayClient, Grant, LeaseOutcome, LeaseRequest, MappingError};
use crate::publisher::PortPublisher;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Owns the lease state and drives the gateway client and port publisher
pub struct LeaseManager<C, P, K> {
    client: C,
    publisher: P,
    clock: K,
    request: LeaseRequest,
    policy: LeasePolicy,
    state: LeaseState,
    /// Port last written by the publisher, `None` once cleared
    published: Option<u16>,
    /// Set when the publisher's last write or removal failed (or was never done)
    publish_pending: bool,
}

impl<C, P, K> LeaseManager<C, P, K>
where
    C: GatewayClient,
    P: PortPublisher,
    K: Clock,
{
    /// Create a manager in the `Unleased` state
    pub fn new(client: C, publisher: P, clock: K, request: LeaseRequest, policy: LeasePolicy) -> Self {
        Self {
            client,
            publisher,
            clock,
            request,
            policy,
            state: LeaseState::Unleased,
            published: None,
            // Whatever is on disk was not written by us
            publish_pending: true,
        }
    }

    /// Current state
    pub fn state(&self) -> &LeaseState {
        &self.state
    }

    /// Port the publisher currently exposes, as far as the manager knows
    pub fn published_port(&self) -> Option<u16> {
        self.published
    }

    /// The publisher
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// The gateway client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run until `shutdown` completes, then clear the published port
    ///
    /// Shutdown interrupts both the wait between attempts and an in-flight
    /// gateway request.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            "Starting lease manager (renew at {:.0}% of lifetime, retry {:?}..{:?})",
            self.policy.renew_fraction * 100.0,
            self.policy.retry_base,
            self.policy.retry_max
        );

        // A new process holds no lease; drop any stale port file
        self.sync_publisher();

        loop {
            let wake = tokio::select! {
                wake = self.step() => wake,
                _ = &mut shutdown => break,
            };

            debug!(
                "Next attempt in {:?} ({})",
                wake.saturating_duration_since(self.clock.now()),
                self.state
            );

            tokio::select! {
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => {}
                _ = &mut shutdown => break,
            }
        }

        self.shutdown();
    }

    /// Perform one attempt and return when the next one is due
    pub async fn step(&mut self) -> Instant {
        if self.state == LeaseState::ShuttingDown {
            return self.clock.now();
        }

        self.expire_if_due();

        // No state is touched until the request completes, so dropping this
        // future mid-request leaves the manager consistent
        let outcome = match self.state.lease().map(|lease| lease.expires_at) {
            Some(expires_at) => self.request_until(expires_at).await,
            None => self.client.request(&self.request).await,
        };
        self.apply(outcome)
    }

    /// Request while holding a lease, giving up once the lease expires
    ///
    /// A request still running at expiry is abandoned and the expired port
    /// withdrawn, rather than left published until the helper times out.
    async fn request_until(&mut self, expires_at: Instant) -> LeaseOutcome {
        let started = self.clock.now();
        let deadline = tokio::time::Instant::from_std(expires_at);
        let result = tokio::time::timeout_at(deadline, self.client.request(&self.request)).await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Lease expired while a mapping request was in flight");
                self.expire_if_due();
                LeaseOutcome::Failed(MappingError::Timeout(
                    expires_at.saturating_duration_since(started),
                ))
            }
        }
    }

    /// Feed one request outcome into the state machine
    ///
    /// Returns the instant of the next attempt. Outcomes arriving after
    /// shutdown are ignored.
    pub fn apply(&mut self, outcome: LeaseOutcome) -> Instant {
        let now = self.clock.now();
        if self.state == LeaseState::ShuttingDown {
            debug!("Ignoring mapping outcome after shutdown: {:?}", outcome);
            return now;
        }
        let before = self.state.to_string();

        let wake = match outcome {
            LeaseOutcome::Granted(grant) => self.on_granted(grant),
            LeaseOutcome::Failed(e) => self.on_failed(e, now),
        };

        let after = self.state.to_string();
        if before != after {
            info!("Lease state: {} -> {}", before, after);
        }

        self.sync_publisher();
        wake
    }

    /// Drop the lease if it has run out, clearing the published port
    ///
    /// Returns true if a lease expired.
    pub fn expire_if_due(&mut self) -> bool {
        let now = self.clock.now();
        let expired = self.state.lease().is_some_and(|lease| lease.is_expired(now));
        if !expired {
            return false;
        }

        if let Some(lease) = self.state.lease() {
            warn!(
                "Lease on port {} expired at {} without renewal",
                lease.public_port(),
                lease.grant.granted_at_utc + chrono::Duration::seconds(i64::from(lease.grant.lifetime_secs))
            );
        }

        self.state = match std::mem::replace(&mut self.state, LeaseState::Unleased) {
            LeaseState::Retrying { attempt, .. } => LeaseState::Retrying {
                attempt,
                lease: None,
            },
            _ => LeaseState::Unleased,
        };

        self.sync_publisher();
        true
    }

    /// Enter the terminal state and withdraw the published port
    pub fn shutdown(&mut self) {
        info!("Shutting down lease manager ({})", self.state);
        self.state = LeaseState::ShuttingDown;

        match self.publisher.clear() {
            Ok(()) => {
                self.published = None;
                self.publish_pending = false;
            }
            Err(e) => error!("Error during cleanup: {}", e),
        }
    }

    fn on_granted(&mut self, grant: Grant) -> Instant {
        let previous_port = self.state.lease().map(ActiveLease::public_port);
        let port = grant.public_port;

        info!(
            "Mapped public port {} (lifetime: {}s{})",
            port,
            grant.lifetime_secs,
            grant
                .public_ip
                .map(|ip| format!(", public address: {}", ip))
                .unwrap_or_default()
        );

        let lease = match std::mem::replace(&mut self.state, LeaseState::Unleased) {
            LeaseState::Leased(mut lease)
            | LeaseState::Retrying {
                lease: Some(mut lease),
                ..
            } => {
                lease.refresh(grant, &self.policy);
                lease
            }
            _ => ActiveLease::new(grant, &self.policy),
        };

        match previous_port {
            Some(old) if old != port => info!("Port changed from {} to {}", old, port),
            Some(_) => debug!("Lease on port {} renewed", port),
            None => {}
        }

        let renew_at = lease.renew_at;
        self.state = LeaseState::Leased(lease);
        renew_at
    }

    fn on_failed(&mut self, e: MappingError, now: Instant) -> Instant {
        let (attempt, lease) = match std::mem::replace(&mut self.state, LeaseState::Unleased) {
            LeaseState::Unleased => (1, None),
            LeaseState::Leased(lease) => (1, Some(lease)),
            LeaseState::Retrying { attempt, lease } => (attempt.saturating_add(1), lease),
            LeaseState::ShuttingDown => {
                self.state = LeaseState::ShuttingDown;
                return now;
            }
        };

        let lease = lease.filter(|lease| {
            if lease.is_expired(now) {
                warn!("Lease on port {} expired while retrying", lease.public_port());
                false
            } else {
                true
            }
        });

        let delay = self.policy.backoff(attempt);
        // Wake no later than expiry so a dead port is withdrawn on time
        let wake = match &lease {
            Some(lease) => (now + delay).min(lease.expires_at),
            None => now + delay,
        };

        warn!(
            "Mapping request failed ({}): {}, will retry (attempt {}) in {:?}",
            e.kind(),
            e,
            attempt,
            wake.saturating_duration_since(now)
        );

        self.state = LeaseState::Retrying { attempt, lease };
        wake
    }

    /// Bring the published port in line with the current lease
    ///
    /// Does nothing if the publisher already shows the right value, so
    /// renewals that keep the same port never rewrite the file.
    fn sync_publisher(&mut self) {
        let desired = self.state.lease().map(ActiveLease::public_port);
        if desired == self.published && !self.publish_pending {
            return;
        }

        let result = match desired {
            Some(port) => self.publisher.publish(port),
            None => self.publisher.clear(),
        };

        match result {
            Ok(()) => {
                self.published = desired;
                self.publish_pending = false;
            }
            Err(e) => {
                // The lease is unaffected; the next transition tries again
                warn!("Failed to publish port {:?}: {}", desired, e);
                self.publish_pending = true;
            }
        }
    }
}
