//! Listening endpoints.
//!
//! [`Listener::bind`] turns a [`ServerConfig`] into a bound, listening
//! socket. TCP sockets are created through `socket2` so that
//! `SO_REUSEPORT` can be set before binding; Unix sockets go straight to
//! tokio and their socket file is removed when the listener is dropped.

use std::{
    fmt, io,
    net::SocketAddr,
    path::PathBuf,
};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

use crate::{
    config::{Network, ServerConfig},
    errors::LifelineError,
};

const LISTEN_BACKLOG: i32 = 1024;

/// A bound, listening endpoint.
///
/// The listener is owned by whichever serve operation is using it and is
/// closed when that operation drops it.
pub enum Listener {
    Tcp(TcpListener),
    Unix { inner: UnixListener, path: PathBuf },
}

/// An accepted connection.
pub enum Connection {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// Local address of a [`Listener`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListenerAddr {
    Inet(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for ListenerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerAddr::Inet(addr) => write!(f, "{}", addr),
            ListenerAddr::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

impl Listener {
    /// Binds the address and network family found in `config`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LifelineError::Bind`] when the address cannot be resolved,
    /// has no address of the requested family, is already in use or
    /// requires privileges the process does not have.
    pub async fn bind(config: &ServerConfig) -> Result<Self, LifelineError> {
        let addr = config.addr();

        match config.network() {
            Network::Unix => {
                let inner = UnixListener::bind(addr).map_err(|e| LifelineError::bind(addr, e))?;
                Ok(Listener::Unix { inner, path: PathBuf::from(addr) })
            }
            network => {
                let socket_addr = resolve(network, addr).await?;
                let listener = bind_tcp(network, socket_addr, config.reuseport())
                    .map_err(|e| LifelineError::bind(addr, e))?;
                Listener::from_std(listener).map_err(|e| LifelineError::bind(addr, e))
            }
        }
    }

    /// Wraps an already listening std TCP listener.
    pub fn from_std(listener: std::net::TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Listener::Tcp(TcpListener::from_std(listener)?))
    }

    /// Waits for the next incoming connection.
    pub async fn accept(&self) -> io::Result<Connection> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _) = listener
                    .accept()
                    .await?;
                Ok(Connection::Tcp(stream))
            }
            Listener::Unix { inner, .. } => {
                let (stream, _) = inner
                    .accept()
                    .await?;
                Ok(Connection::Unix(stream))
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<ListenerAddr> {
        match self {
            Listener::Tcp(listener) => listener
                .local_addr()
                .map(ListenerAddr::Inet),
            Listener::Unix { path, .. } => Ok(ListenerAddr::Unix(path.clone())),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path.as_path());
        }
    }
}

/// Resolves `addr` and keeps the first address of the requested family.
pub(crate) async fn resolve(network: Network, addr: &str) -> Result<SocketAddr, LifelineError> {
    let mut candidates = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| LifelineError::bind(addr, e))?;

    candidates
        .find(|candidate| match network {
            Network::Tcp4 => candidate.is_ipv4(),
            Network::Tcp6 => candidate.is_ipv6(),
            _ => true,
        })
        .ok_or_else(|| {
            LifelineError::bind(
                addr,
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no {} address found", network),
                ),
            )
        })
}

/// Creates a listening TCP socket, optionally with `SO_REUSEPORT`.
pub(crate) fn bind_tcp(
    network: Network,
    addr: SocketAddr,
    reuseport: bool,
) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if network == Network::Tcp6 {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    if reuseport {
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
