// Test doubles shared by the scenario tests

use crate::clock::Clock;
use crate::natpmp::{GatewayClient, Grant, LeaseOutcome, LeaseRequest, MappingError};
use crate::publisher::{PortFilePublisher, PortPublisher};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Clock that only moves when told to
///
/// Clones share the same time, so a test can keep one handle and give another
/// to the manager.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    elapsed: Arc<Mutex<Duration>>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant (t = 0)
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Utc::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// The instant this clock treats as t = 0
    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn elapsed(&self) -> Duration {
        *self.lock()
    }

    pub fn advance(&self, by: Duration) {
        *self.lock() += by;
    }

    /// Jump to `at` after t = 0. Moving backwards is ignored.
    pub fn set(&self, at: Duration) {
        let mut elapsed = self.lock();
        if at > *elapsed {
            *elapsed = at;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Duration> {
        self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::zero());
        self.wall_origin + elapsed
    }
}

/// What the fake gateway does on its next request
#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    Grant { port: u16, lifetime_secs: u32 },
    Unreachable,
    Timeout,
    Parse,
    /// Never answers
    Hang,
}

/// Gateway client that replays a script and then keeps failing
pub struct FakeGatewayClient<K> {
    clock: K,
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
}

impl<K: Clock> FakeGatewayClient<K> {
    pub fn new(clock: K, script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            clock,
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn push(&self, next: Scripted) {
        self.script.lock().unwrap().push_back(next);
    }
}

impl<K: Clock + Sync> GatewayClient for FakeGatewayClient<K> {
    async fn request(&self, _request: &LeaseRequest) -> LeaseOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Unreachable);

        match next {
            Scripted::Grant { port, lifetime_secs } => LeaseOutcome::Granted(Grant {
                public_port: port,
                lifetime_secs,
                public_ip: None,
                granted_at: self.clock.now(),
                granted_at_utc: self.clock.wall_now(),
            }),
            Scripted::Unreachable => LeaseOutcome::Failed(MappingError::GatewayUnreachable(
                "Gateway does not support NAT-PMP (-7)".to_string(),
            )),
            Scripted::Timeout => {
                LeaseOutcome::Failed(MappingError::Timeout(Duration::from_secs(10)))
            }
            Scripted::Parse => LeaseOutcome::Failed(MappingError::Parse("garbage".to_string())),
            Scripted::Hang => std::future::pending().await,
        }
    }
}

/// Operations seen by a [`RecordingPublisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOp {
    Publish(u16),
    Clear,
}

/// Real port file publisher that also records every operation and can be
/// told to fail the next few writes
#[derive(Clone)]
pub struct RecordingPublisher {
    inner: PortFilePublisher,
    ops: Arc<Mutex<Vec<PublishOp>>>,
    failures_left: Arc<AtomicUsize>,
}

impl RecordingPublisher {
    pub fn new(path: &Path) -> Self {
        Self {
            inner: PortFilePublisher::new(path),
            ops: Arc::new(Mutex::new(Vec::new())),
            failures_left: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<PublishOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, PublishOp::Publish(_)))
            .count()
    }

    /// Port currently in the file
    pub fn on_disk(&self) -> Option<u16> {
        self.inner.read_port().unwrap()
    }

    fn should_fail(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl PortPublisher for RecordingPublisher {
    fn publish(&mut self, port: u16) -> Result<()> {
        if self.should_fail() {
            return Err(Error::Publish("disk full".to_string()));
        }
        self.ops.lock().unwrap().push(PublishOp::Publish(port));
        self.inner.publish(port)
    }

    fn clear(&mut self) -> Result<()> {
        if self.should_fail() {
            return Err(Error::Publish("permission denied".to_string()));
        }
        self.ops.lock().unwrap().push(PublishOp::Clear);
        self.inner.clear()
    }
}

#[test]
fn test_manual_clock_advances() {
    let clock = ManualClock::new();
    let start = clock.now();

    clock.advance(Duration::from_secs(30));
    assert_eq!(clock.now() - start, Duration::from_secs(30));

    let shared = clock.clone();
    shared.advance(Duration::from_secs(10));
    assert_eq!(clock.elapsed(), Duration::from_secs(40));
}

#[test]
fn test_manual_clock_set_never_goes_backwards() {
    let clock = ManualClock::new();
    clock.set(Duration::from_secs(100));
    clock.set(Duration::from_secs(50));
    assert_eq!(clock.elapsed(), Duration::from_secs(100));
    assert_eq!((clock.wall_now() - clock.wall_origin).num_seconds(), 100);
}
