//! Error types for lifeline.
//!
//! Every public operation returns [`LifelineError`]. Engine errors are
//! carried verbatim inside [`LifelineError::Serve`], so callers can
//! downcast them back to the engine's own error type.
//!
//! # Examples
//!
//! ```rust,ignore
//! use lifeline::errors::{LifelineError, ForkError};
//!
//! match server.listen_and_serve().await {
//!     Ok(()) => println!("stopped"),
//!     Err(LifelineError::Bind { addr, source }) => eprintln!("cannot bind {}: {}", addr, source),
//!     Err(LifelineError::Fork(ForkError::OverRecovery { .. })) => eprintln!("workers keep crashing"),
//!     Err(other) => eprintln!("{}", other),
//! }
//! ```

use std::io;

use thiserror::Error;

use crate::config::Network;

/// Boxed error used at the engine boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for lifecycle operations.
#[derive(Debug, Error)]
pub enum LifelineError {
    /// Configuration was rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Failed to acquire the listening endpoint
    #[error("Failed to bind to address {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Error returned by the request-serving engine, untouched
    #[error(transparent)]
    Serve(BoxError),

    /// The engine failed to shut down
    #[error("failed to shutdown: {0}")]
    Shutdown(#[source] BoxError),

    /// Subscribing to the termination signals failed
    #[error("Failed to subscribe to shutdown signals: {0}")]
    Signal(#[source] io::Error),

    /// Process forker errors
    #[error(transparent)]
    Fork(#[from] ForkError),
}

impl LifelineError {
    pub(crate) fn bind(addr: &str, source: io::Error) -> Self {
        LifelineError::Bind { addr: addr.to_string(), source }
    }
}

/// Configuration errors raised by builders and settings files.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// The bind address is empty
    #[error("Address must not be empty")]
    EmptyAddress,

    /// Reuse-port only applies to TCP sockets
    #[error("Reuseport is not supported on {0} sockets")]
    ReuseportUnsupported(Network),

    /// Prefork workers share TCP sockets only
    #[error("Prefork is not supported on {0} sockets")]
    PreforkUnsupported(Network),

    /// Signal that cannot be caught
    #[error("Signal {0} cannot be used as a shutdown signal")]
    ForbiddenSignal(i32),

    /// Signal name not recognized
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// Network family not recognized
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    /// Settings file could not be read or parsed
    #[error("Invalid settings: {0}")]
    Settings(String),
}

/// Process forker errors.
#[derive(Debug, Error)]
pub enum ForkError {
    /// Children exited more often than the recovery threshold allows
    #[error("exceeding the value of recover threshold ({threshold})")]
    OverRecovery { threshold: usize },

    /// Prefork needs a TCP network
    #[error("prefork only supports tcp networks, got {0}")]
    UnsupportedNetwork(Network),

    /// A child process could not be started
    #[error("failed to start a child prefork process: {0}")]
    Spawn(#[source] io::Error),

    /// The listener handed over by the master could not be adopted
    #[error("failed to inherit listener from master process: {0}")]
    InheritListener(#[source] io::Error),

    /// The current executable could not be located
    #[error("failed to locate current executable: {0}")]
    CurrentExe(#[source] io::Error),
}
