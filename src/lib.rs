//! Lifecycle manager for network servers.
//!
//! [`Lifeline`] owns a [`ServerConfig`] and a request-serving [`Engine`]. A
//! single call to [`Lifeline::listen_and_serve`] either fans out into prefork
//! worker processes or binds a listener and serves it, directly or with
//! graceful shutdown on termination signals.
//!
//! # Examples
//!
//! ```rust,ignore
//! use lifeline::{
//!     config::ServerConfig,
//!     server::http::{handler_fn, HttpEngine},
//!     Lifeline,
//! };
//!
//! let config = ServerConfig::builder()
//!     .addr("0.0.0.0:8080")
//!     .graceful_shutdown(true)
//!     .build()?;
//!
//! let engine = HttpEngine::new(handler_fn(|_request| async move {
//!     Ok(http::Response::new(http_body_util::Full::new(bytes::Bytes::from("Hello"))))
//! }));
//!
//! Lifeline::new(config, engine)
//!     .listen_and_serve()
//!     .await?;
//! ```

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;

use crate::{
    config::ServerConfig,
    errors::{BoxError, LifelineError},
    prefork::{Prefork, ServeFn},
    server::{listener::Listener, signals::ShutdownSignals, Engine},
};

pub mod config;
pub mod errors;
pub mod logger;
pub mod prefork;
pub mod server;
mod tests;

pub use prefork::is_prefork_child;

pub(crate) const SHUTDOWN_SIGNAL_RECEIVED: &str = "Shutdown signal received";
pub(crate) const GRACEFULLY_STOPPED: &str = "Server gracefully stopped";

/// A server lifecycle: configuration plus the engine that serves requests.
pub struct Lifeline<E: Engine> {
    config: Arc<ServerConfig>,
    engine: Arc<E>,
    graceful_shutdown: Arc<AtomicBool>,
}

impl<E: Engine> Clone for Lifeline<E> {
    fn clone(&self) -> Self {
        Self {
            config: self
                .config
                .clone(),
            engine: self
                .engine
                .clone(),
            graceful_shutdown: self
                .graceful_shutdown
                .clone(),
        }
    }
}

impl<E: Engine> Lifeline<E> {
    pub fn new(config: ServerConfig, engine: E) -> Self {
        let graceful_shutdown = Arc::new(AtomicBool::new(config.graceful_shutdown()));
        Self { config: Arc::new(config), engine: Arc::new(engine), graceful_shutdown }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Whether graceful shutdown is active for this server.
    ///
    /// Starts from the configured value and becomes true once the graceful
    /// path has been taken.
    pub fn is_graceful_shutdown(&self) -> bool {
        self.graceful_shutdown
            .load(Ordering::SeqCst)
    }

    /// Serves requests on the configured network and address.
    ///
    /// Blocks until the server stops. With prefork enabled the result is the
    /// process forker's, unchanged. Otherwise a listener is bound first and a
    /// bind failure is returned before the engine is involved.
    pub async fn listen_and_serve(&self) -> Result<(), LifelineError> {
        if self
            .config
            .prefork()
        {
            return self
                .new_prefork()?
                .listen_and_serve(self.config.addr())
                .await;
        }

        let listener = Listener::bind(&self.config).await?;

        if self
            .config
            .graceful_shutdown()
        {
            return self
                .serve_gracefully(listener)
                .await;
        }

        self.serve(listener)
            .await
    }

    /// Serves connections from `listener` until the engine returns.
    pub async fn serve(&self, listener: Listener) -> Result<(), LifelineError> {
        self.engine
            .serve(listener)
            .await
            .map_err(LifelineError::Serve)
    }

    /// Serves connections from `listener` and shuts the engine down when one
    /// of the configured termination signals arrives.
    ///
    /// The signal subscription is in place before serving starts and ends
    /// when this returns.
    pub async fn serve_gracefully(&self, listener: Listener) -> Result<(), LifelineError> {
        let mut signals = ShutdownSignals::subscribe(self.config.graceful_shutdown_signals())
            .map_err(LifelineError::Signal)?;

        self.serve_gracefully_with(listener, signals.recv())
            .await
    }

    /// Like [`Lifeline::serve_gracefully`], with `shutdown` as the trigger
    /// instead of OS signals.
    ///
    /// Whichever finishes first wins:
    /// - the engine's serve returns: its result is returned as is;
    /// - `shutdown` completes: the engine is shut down and the result is
    ///   `Ok(())`, or [`LifelineError::Shutdown`] if that failed. The serving
    ///   task is left to wind down on its own and its result is discarded.
    pub async fn serve_gracefully_with<F>(
        &self,
        listener: Listener,
        shutdown: F,
    ) -> Result<(), LifelineError>
    where
        F: Future<Output = ()>,
    {
        self.graceful_shutdown
            .store(true, Ordering::SeqCst);

        let (done_tx, done_rx) = oneshot::channel::<Result<(), BoxError>>();
        let engine = self
            .engine
            .clone();
        tokio::spawn(async move {
            let result = engine
                .serve(listener)
                .await;
            let _ = done_tx.send(result);
        });

        let logger = self
            .config
            .logger();

        tokio::select! {
            biased;

            done = done_rx => match done {
                Ok(result) => result.map_err(LifelineError::Serve),
                Err(_) => Err(LifelineError::Serve("serve task ended without reporting a result".into())),
            },
            _ = shutdown => {
                logger.print(SHUTDOWN_SIGNAL_RECEIVED);

                self.engine
                    .shutdown()
                    .await
                    .map_err(LifelineError::Shutdown)?;

                logger.print(GRACEFULLY_STOPPED);
                Ok(())
            }
        }
    }

    fn new_prefork(&self) -> Result<Prefork, LifelineError> {
        let server = self.clone();
        let serve_fn: ServeFn = if self
            .config
            .graceful_shutdown()
        {
            Arc::new(move |listener: Listener| -> BoxFuture<'static, Result<(), LifelineError>> {
                let server = server.clone();
                Box::pin(async move {
                    server
                        .serve_gracefully(listener)
                        .await
                })
            })
        } else {
            Arc::new(move |listener: Listener| -> BoxFuture<'static, Result<(), LifelineError>> {
                let server = server.clone();
                Box::pin(async move {
                    server
                        .serve(listener)
                        .await
                })
            })
        };

        let prefork = Prefork::new(
            self.config
                .network(),
            self.config
                .reuseport(),
            self.config
                .recover_threshold(),
            self.config
                .logger()
                .clone(),
            serve_fn,
        )?;

        Ok(prefork)
    }
}
