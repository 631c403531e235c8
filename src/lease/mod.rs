//! Lease acquisition and renewal
//!
//! - `policy` - renewal timing and retry backoff
//! - `state` - the active lease and the state machine's states
//! - `manager` - the state machine driving the gateway client and publisher

pub mod manager;
pub mod policy;
pub mod state;

pub use manager::LeaseManager;
pub use policy::LeasePolicy;
pub use state::{ActiveLease, LeaseState};
