//! HTTP/1 request-serving engine built on hyper.
//!
//! Every accepted connection runs on its own task. On shutdown the engine
//! stops accepting, asks each open connection to finish its in-flight request
//! and close, and waits for them, optionally bounded by a drain timeout.

use std::{future::Future, io, pin::Pin, sync::Arc, time::Duration};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{body::Incoming, server::conn::http1, service::Service};
use hyper_util::rt::TokioIo;
use log::{debug, error};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    errors::BoxError,
    server::{
        listener::{Connection, Listener},
        Engine, EngineResult,
    },
};

pub type Request = http::Request<Incoming>;

pub type Response = http::Response<Full<Bytes>>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, BoxError>> + Send>>;

/// Boxed request handler.
pub type BoxedHandler = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

/// Creates a [`BoxedHandler`] from an async function.
///
/// # Examples
///
/// ```rust,ignore
/// use lifeline::server::http::{handler_fn, HttpEngine};
///
/// let engine = HttpEngine::new(handler_fn(|_request| async move {
///     Ok(http::Response::new(http_body_util::Full::new(bytes::Bytes::from("pong"))))
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> BoxedHandler
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, BoxError>> + Send + 'static,
{
    Arc::new(move |req: Request| -> HandlerFuture { Box::pin(f(req)) })
}

/// Errors raised by [`HttpEngine`].
#[derive(Debug, Error)]
pub enum HttpError {
    /// The listener stopped accepting connections
    #[error("Failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// Open connections did not finish within the drain timeout
    #[error("Connections still open after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Pause before accepting again once the process runs out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How the accept loop reacts to an accept error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AcceptFailure {
    /// The pending connection went away; accept the next one.
    Connection,
    /// Out of descriptors or buffers; back off and retry.
    Exhausted,
    /// The listener itself is broken.
    Fatal,
}

pub(crate) fn classify_accept_error(e: &io::Error) -> AcceptFailure {
    if let Some(code) = e.raw_os_error() {
        if matches!(code, libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM) {
            return AcceptFailure::Exhausted;
        }
    }

    match e.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => AcceptFailure::Connection,
        io::ErrorKind::OutOfMemory => AcceptFailure::Exhausted,
        _ => AcceptFailure::Fatal,
    }
}

#[derive(Clone)]
struct HandlerService {
    handler: BoxedHandler,
}

impl Service<Request> for HandlerService {
    type Response = Response;
    type Error = BoxError;
    type Future = HandlerFuture;

    fn call(&self, req: Request) -> Self::Future {
        (self.handler)(req)
    }
}

/// HTTP/1 engine.
///
/// Once shut down, an engine cannot serve again; create a new one instead.
pub struct HttpEngine {
    handler: BoxedHandler,
    shutdown_timeout: Option<Duration>,
    token: CancellationToken,
    connections: TaskTracker,
}

impl HttpEngine {
    pub fn new(handler: BoxedHandler) -> Self {
        Self {
            handler,
            shutdown_timeout: None,
            token: CancellationToken::new(),
            connections: TaskTracker::new(),
        }
    }

    /// Bounds how long [`Engine::shutdown`] waits for open connections.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Number of connections currently being served.
    pub fn open_connections(&self) -> usize {
        self.connections
            .len()
    }

    async fn accept_loop(&self, listener: Listener) -> Result<(), BoxError> {
        loop {
            let accepted = tokio::select! {
                _ = self.token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok(Connection::Tcp(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        error!("Cannot set TCP_NODELAY: {}", e);
                    }
                    self.spawn_connection(stream);
                }
                Ok(Connection::Unix(stream)) => self.spawn_connection(stream),
                Err(e) => match classify_accept_error(&e) {
                    AcceptFailure::Connection => {
                        debug!("Dropped connection during accept: {}", e);
                    }
                    AcceptFailure::Exhausted => {
                        error!("Accept failed, retrying in {:?}: {}", ACCEPT_BACKOFF, e);
                        tokio::select! {
                            _ = self.token.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                    AcceptFailure::Fatal => return Err(HttpError::Accept(e).into()),
                },
            }
        }

        Ok(())
    }

    fn spawn_connection<T>(&self, stream: T)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let service = HandlerService {
            handler: self
                .handler
                .clone(),
        };
        let token = self
            .token
            .clone();

        self.connections
            .spawn(async move {
                let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                tokio::pin!(conn);

                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(err) = result {
                            error!("Error serving connection: {:?}", err);
                        }
                    }
                    _ = token.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        if let Err(err) = conn.await {
                            error!("Error serving connection: {:?}", err);
                        }
                    }
                }
            });
    }
}

impl Engine for HttpEngine {
    fn serve(&self, listener: Listener) -> EngineResult<'_, ()> {
        Box::pin(self.accept_loop(listener))
    }

    fn shutdown(&self) -> EngineResult<'_, ()> {
        Box::pin(async move {
            self.token
                .cancel();
            self.connections
                .close();

            match self.shutdown_timeout {
                Some(timeout) => tokio::time::timeout(timeout, self.connections.wait())
                    .await
                    .map_err(|_| HttpError::ShutdownTimeout(timeout))?,
                None => {
                    self.connections
                        .wait()
                        .await
                }
            }

            Ok(())
        })
    }
}
