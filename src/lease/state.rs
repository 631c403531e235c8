//! Lease state held by the manager

use super::policy::LeasePolicy;
use crate::natpmp::Grant;
use std::fmt;
use std::time::Instant;

/// The lease the manager currently believes it holds
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveLease {
    /// Most recent grant
    pub grant: Grant,
    /// When the gateway will drop the mapping unless renewed
    pub expires_at: Instant,
    /// When to start renewing
    pub renew_at: Instant,
}

impl ActiveLease {
    /// Build a lease from a fresh grant
    pub fn new(grant: Grant, policy: &LeasePolicy) -> Self {
        let lifetime = grant.lifetime();
        let granted_at = grant.granted_at;
        Self {
            expires_at: granted_at + lifetime,
            renew_at: granted_at + policy.renew_after(lifetime),
            grant,
        }
    }

    /// Update this lease in place after a successful renewal
    pub fn refresh(&mut self, grant: Grant, policy: &LeasePolicy) {
        *self = Self::new(grant, policy);
    }

    /// Public port of the lease
    pub fn public_port(&self) -> u16 {
        self.grant.public_port
    }

    /// Check whether the lease has run out at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// States of the lease state machine
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseState {
    /// No lease and no failures yet
    Unleased,
    /// Holding a lease, next wake is its renewal time
    Leased(ActiveLease),
    /// Recovering from `attempt` consecutive failures, possibly still holding
    /// an unexpired lease
    Retrying {
        /// Number of consecutive failed attempts
        attempt: u32,
        /// Lease from before the failures, while not yet expired
        lease: Option<ActiveLease>,
    },
    /// Terminal
    ShuttingDown,
}

impl LeaseState {
    /// Lease currently held, if any
    pub fn lease(&self) -> Option<&ActiveLease> {
        match self {
            Self::Leased(lease) => Some(lease),
            Self::Retrying { lease, .. } => lease.as_ref(),
            Self::Unleased | Self::ShuttingDown => None,
        }
    }

    /// Consecutive failures so far (0 unless retrying)
    pub fn attempt(&self) -> u32 {
        match self {
            Self::Retrying { attempt, .. } => *attempt,
            _ => 0,
        }
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unleased => f.write_str("unleased"),
            Self::Leased(lease) => write!(f, "leased (port {})", lease.public_port()),
            Self::Retrying {
                attempt,
                lease: Some(lease),
            } => write!(f, "retrying #{} (holding port {})", attempt, lease.public_port()),
            Self::Retrying { attempt, lease: None } => write!(f, "retrying #{} (no lease)", attempt),
            Self::ShuttingDown => f.write_str("shutting down"),
        }
    }
}
