//! Configuration builders and types for lifeline.
//!
//! [`ServerConfig`] is immutable once built. It is created through a fluent
//! builder that validates the combination of options, or from a TOML
//! settings file through [`ServerSettings`].
//!
//! # Examples
//!
//! ```rust,ignore
//! use lifeline::config::{Network, ServerConfig};
//!
//! let config = ServerConfig::builder()
//!     .network(Network::Tcp4)
//!     .addr("0.0.0.0:8080")
//!     .graceful_shutdown(true)
//!     .build()?;
//! ```

use std::{fmt, str::FromStr, sync::Arc, thread};

use serde::Deserialize;
use signal_hook::consts::signal::{
    SIGABRT, SIGALRM, SIGHUP, SIGINT, SIGPIPE, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2, SIGWINCH,
};

use crate::{
    errors::{ConfigError, LifelineError},
    logger::{DefaultLogger, Logger},
};

/// Default bind address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";

/// Signals observed by graceful shutdown when none are configured.
pub const DEFAULT_SHUTDOWN_SIGNALS: [i32; 2] = [SIGINT, SIGTERM];

const SIGNAL_NAMES: [(&str, i32); 10] = [
    ("SIGHUP", SIGHUP),
    ("SIGINT", SIGINT),
    ("SIGQUIT", SIGQUIT),
    ("SIGABRT", SIGABRT),
    ("SIGPIPE", SIGPIPE),
    ("SIGALRM", SIGALRM),
    ("SIGTERM", SIGTERM),
    ("SIGUSR1", SIGUSR1),
    ("SIGUSR2", SIGUSR2),
    ("SIGWINCH", SIGWINCH),
];

/// Network family of the listening endpoint.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// IPv4 or IPv6, whichever the address resolves to first
    Tcp,
    /// IPv4 only
    #[default]
    Tcp4,
    /// IPv6 only
    Tcp6,
    /// Unix domain socket, the address is a filesystem path
    Unix,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Unix => "unix",
        }
    }

    /// Returns whether this is one of the TCP families.
    pub fn is_tcp(&self) -> bool {
        !matches!(self, Network::Unix)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s
            .to_ascii_lowercase()
            .as_str()
        {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            "unix" => Ok(Network::Unix),
            _ => Err(ConfigError::UnknownNetwork(s.to_string())),
        }
    }
}

/// Resolves a signal name such as `SIGTERM` or `term` to its number.
pub fn parse_signal(name: &str) -> Result<i32, ConfigError> {
    let upper = name
        .trim()
        .to_ascii_uppercase();
    let full = if upper.starts_with("SIG") { upper } else { format!("SIG{}", upper) };

    SIGNAL_NAMES
        .iter()
        .find(|(candidate, _)| *candidate == full)
        .map(|(_, signal)| *signal)
        .ok_or_else(|| ConfigError::UnknownSignal(name.to_string()))
}

/// Half of the available parallelism, rounded down.
///
/// This is the default number of worker crashes the process forker tolerates
/// before giving up.
pub fn default_recover_threshold() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        / 2
}

/// Builder for [`ServerConfig`].
#[derive(Clone)]
pub struct ServerConfigBuilder {
    network: Network,
    addr: String,
    reuseport: bool,
    prefork: bool,
    graceful_shutdown: bool,
    graceful_shutdown_signals: Vec<i32>,
    recover_threshold: Option<usize>,
    logger: Arc<dyn Logger>,
}

impl ServerConfigBuilder {
    /// Sets the network family.
    pub fn network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Sets the bind address, `host:port` for TCP or a path for Unix sockets.
    pub fn addr(mut self, addr: &str) -> Self {
        self.addr = addr.to_string();
        self
    }

    /// Enables `SO_REUSEPORT` on the listening socket.
    pub fn reuseport(mut self, reuseport: bool) -> Self {
        self.reuseport = reuseport;
        self
    }

    /// Runs the server as a set of prefork worker processes.
    pub fn prefork(mut self, prefork: bool) -> Self {
        self.prefork = prefork;
        self
    }

    /// Stops the server gracefully when a shutdown signal arrives.
    pub fn graceful_shutdown(mut self, graceful_shutdown: bool) -> Self {
        self.graceful_shutdown = graceful_shutdown;
        self
    }

    /// Replaces the signals that trigger graceful shutdown.
    ///
    /// An empty set falls back to [`DEFAULT_SHUTDOWN_SIGNALS`].
    pub fn graceful_shutdown_signals(mut self, signals: Vec<i32>) -> Self {
        self.graceful_shutdown_signals = signals;
        self
    }

    /// Overrides how many worker exits the process forker tolerates.
    pub fn recover_threshold(mut self, recover_threshold: usize) -> Self {
        self.recover_threshold = Some(recover_threshold);
        self
    }

    /// Sets the logger used for lifecycle messages.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Validates the options and creates the `ServerConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`LifelineError::Config`] when the address is empty, when
    /// reuse-port or prefork is requested on a Unix socket, or when a
    /// shutdown signal cannot be caught.
    pub fn build(self) -> Result<ServerConfig, LifelineError> {
        if self
            .addr
            .trim()
            .is_empty()
        {
            return Err(ConfigError::EmptyAddress.into());
        }

        if !self
            .network
            .is_tcp()
        {
            if self.reuseport {
                return Err(ConfigError::ReuseportUnsupported(self.network).into());
            }
            if self.prefork {
                return Err(ConfigError::PreforkUnsupported(self.network).into());
            }
        }

        let graceful_shutdown_signals = if self
            .graceful_shutdown_signals
            .is_empty()
        {
            DEFAULT_SHUTDOWN_SIGNALS.to_vec()
        } else {
            self.graceful_shutdown_signals
        };

        if let Some(signal) = graceful_shutdown_signals
            .iter()
            .find(|signal| signal_hook::consts::FORBIDDEN.contains(*signal))
        {
            return Err(ConfigError::ForbiddenSignal(*signal).into());
        }

        Ok(ServerConfig {
            network: self.network,
            addr: self.addr,
            reuseport: self.reuseport,
            prefork: self.prefork,
            graceful_shutdown: self.graceful_shutdown,
            graceful_shutdown_signals,
            recover_threshold: self
                .recover_threshold
                .unwrap_or_else(default_recover_threshold),
            logger: self.logger,
        })
    }
}

/// Server configuration consumed by every lifecycle component.
#[derive(Clone)]
pub struct ServerConfig {
    network: Network,
    addr: String,
    reuseport: bool,
    prefork: bool,
    graceful_shutdown: bool,
    graceful_shutdown_signals: Vec<i32>,
    recover_threshold: usize,
    logger: Arc<dyn Logger>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            network: Network::default(),
            addr: DEFAULT_ADDR.to_string(),
            reuseport: false,
            prefork: false,
            graceful_shutdown: false,
            graceful_shutdown_signals: DEFAULT_SHUTDOWN_SIGNALS.to_vec(),
            recover_threshold: default_recover_threshold(),
            logger: Arc::new(DefaultLogger),
        }
    }
}

impl ServerConfig {
    /// Creates a new `ServerConfigBuilder`.
    ///
    /// Default values:
    /// - network: tcp4
    /// - addr: "127.0.0.1:8000"
    /// - reuseport, prefork, graceful_shutdown: false
    /// - graceful_shutdown_signals: SIGINT, SIGTERM
    /// - recover_threshold: half of the available parallelism
    /// - logger: [`DefaultLogger`]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder {
            network: Network::default(),
            addr: DEFAULT_ADDR.to_string(),
            reuseport: false,
            prefork: false,
            graceful_shutdown: false,
            graceful_shutdown_signals: DEFAULT_SHUTDOWN_SIGNALS.to_vec(),
            recover_threshold: None,
            logger: Arc::new(DefaultLogger),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn reuseport(&self) -> bool {
        self.reuseport
    }

    pub fn prefork(&self) -> bool {
        self.prefork
    }

    pub fn graceful_shutdown(&self) -> bool {
        self.graceful_shutdown
    }

    pub fn graceful_shutdown_signals(&self) -> &[i32] {
        &self.graceful_shutdown_signals
    }

    pub fn recover_threshold(&self) -> usize {
        self.recover_threshold
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }
}

/// Server settings as written in a TOML settings file.
///
/// Every field is optional; missing fields keep the builder's value.
///
/// ```toml
/// [server]
/// network = "tcp4"
/// addr = "0.0.0.0:8080"
/// prefork = true
/// graceful_shutdown = true
/// graceful_shutdown_signals = ["SIGINT", "SIGTERM"]
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub network: Option<Network>,
    pub addr: Option<String>,
    pub reuseport: Option<bool>,
    pub prefork: Option<bool>,
    pub graceful_shutdown: Option<bool>,
    pub graceful_shutdown_signals: Option<Vec<String>>,
    pub recover_threshold: Option<usize>,
}

#[derive(Deserialize)]
struct SettingsFile {
    #[serde(default)]
    server: ServerSettings,
}

impl ServerSettings {
    /// Parses the `[server]` table of a TOML document.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        toml::from_str::<SettingsFile>(document)
            .map(|file| file.server)
            .map_err(|e| ConfigError::Settings(e.to_string()))
    }

    /// Applies the settings present in the file on top of `builder`.
    pub fn apply(self, mut builder: ServerConfigBuilder) -> Result<ServerConfigBuilder, ConfigError> {
        if let Some(network) = self.network {
            builder = builder.network(network);
        }
        if let Some(addr) = self.addr {
            builder = builder.addr(&addr);
        }
        if let Some(reuseport) = self.reuseport {
            builder = builder.reuseport(reuseport);
        }
        if let Some(prefork) = self.prefork {
            builder = builder.prefork(prefork);
        }
        if let Some(graceful_shutdown) = self.graceful_shutdown {
            builder = builder.graceful_shutdown(graceful_shutdown);
        }
        if let Some(names) = self.graceful_shutdown_signals {
            let signals = names
                .iter()
                .map(|name| parse_signal(name))
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.graceful_shutdown_signals(signals);
        }
        if let Some(recover_threshold) = self.recover_threshold {
            builder = builder.recover_threshold(recover_threshold);
        }
        Ok(builder)
    }
}
