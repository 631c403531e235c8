//! auto-natpmp - keep a NAT-PMP port forward alive
//!
//! This library provides the pieces of the `auto-natpmp` daemon: a client that
//! asks the gateway for a port mapping through an external helper, a publisher
//! that exposes the granted port to other local processes through a file, and
//! the lease manager that renews the mapping and recovers from failures.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod daemon;
pub mod lease;
pub mod logging;
pub mod natpmp;
pub mod publisher;
pub mod settings;

/// Result type alias for auto-natpmp operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for auto-natpmp operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid startup configuration (fatal)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Writing or removing the port file failed
    #[error("Publish error: {0}")]
    Publish(String),

    /// Logging could not be set up
    #[error("Logging error: {0}")]
    Logging(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests;
