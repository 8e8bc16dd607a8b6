//! Request-serving engines and the pieces the lifecycle wires around them.
//!
//! # Modules
//!
//! - [`listener`]: listening endpoints and their provisioning
//! - [`signals`]: termination signal subscription
//! - [`http`]: HTTP/1 engine built on hyper
//!
//! # Examples
//!
//! ```rust,ignore
//! use lifeline::server::{http::{handler_fn, HttpEngine}, Engine};
//!
//! let engine = HttpEngine::new(handler_fn(|_request| async move {
//!     Ok(http::Response::new(http_body_util::Full::new(bytes::Bytes::from("Hello"))))
//! }));
//! ```

use std::{future::Future, pin::Pin};

use crate::{errors::BoxError, server::listener::Listener};

#[cfg(feature = "http1")]
pub mod http;
pub mod listener;
pub mod signals;

pub type EngineResult<'a, T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'a>>;

/// Trait for request-serving engines.
///
/// The lifecycle hands a bound [`Listener`] to [`Engine::serve`] and, when a
/// termination signal arrives on the graceful path, calls
/// [`Engine::shutdown`] from another task.
pub trait Engine: Send + Sync + 'static {
    /// Serves connections from `listener` until it fails or the engine is
    /// shut down.
    ///
    /// The listener is dropped, and therefore closed, when the returned
    /// future completes.
    fn serve(&self, listener: Listener) -> EngineResult<'_, ()>;

    /// Makes a running [`Engine::serve`] return.
    ///
    /// Implementations should be idempotent. How in-flight requests are
    /// treated is up to the engine.
    fn shutdown(&self) -> EngineResult<'_, ()>;
}
