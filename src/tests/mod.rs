#[cfg(test)]
mod config;
#[cfg(test)]
mod listener;

#[cfg(test)]
pub(crate) mod support {
    use std::{
        io,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };

    use tokio::sync::Notify;

    use crate::{
        config::ServerConfig,
        logger::Logger,
        server::{listener::Listener, Engine, EngineResult},
    };

    /// Logger that keeps every printed line.
    #[derive(Default)]
    pub(crate) struct CaptureLogger {
        lines: Mutex<Vec<String>>,
    }

    impl CaptureLogger {
        pub(crate) fn lines(&self) -> Vec<String> {
            self.lines
                .lock()
                .map(|lines| lines.clone())
                .unwrap_or_default()
        }
    }

    impl Logger for CaptureLogger {
        fn print(&self, message: &str) {
            if let Ok(mut lines) = self
                .lines
                .lock()
            {
                lines.push(message.to_string());
            }
        }
    }

    /// Engine whose serve and shutdown outcomes are scripted by the test.
    #[derive(Default)]
    pub(crate) struct MockEngine {
        serve_error: Option<String>,
        shutdown_error: Option<String>,
        block_until_shutdown: bool,
        pub(crate) serve_calls: AtomicUsize,
        pub(crate) shutdown_calls: AtomicUsize,
        pub(crate) started: Notify,
        stop: Notify,
    }

    impl MockEngine {
        /// Serve returns `Ok(())` right away.
        pub(crate) fn returning_ok() -> Self {
            Self::default()
        }

        /// Serve fails right away with `message`.
        pub(crate) fn failing_with(message: &str) -> Self {
            Self { serve_error: Some(message.to_string()), ..Self::default() }
        }

        /// Serve blocks until shutdown is called.
        pub(crate) fn blocking() -> Self {
            Self { block_until_shutdown: true, ..Self::default() }
        }

        /// Serve blocks; shutdown fails with `message`.
        pub(crate) fn blocking_with_shutdown_error(message: &str) -> Self {
            Self {
                block_until_shutdown: true,
                shutdown_error: Some(message.to_string()),
                ..Self::default()
            }
        }

        pub(crate) fn serve_calls(&self) -> usize {
            self.serve_calls
                .load(Ordering::SeqCst)
        }

        pub(crate) fn shutdown_calls(&self) -> usize {
            self.shutdown_calls
                .load(Ordering::SeqCst)
        }
    }

    impl Engine for MockEngine {
        fn serve(&self, listener: Listener) -> EngineResult<'_, ()> {
            Box::pin(async move {
                self.serve_calls
                    .fetch_add(1, Ordering::SeqCst);
                self.started
                    .notify_one();

                if self.block_until_shutdown {
                    self.stop
                        .notified()
                        .await;
                }
                drop(listener);

                match &self.serve_error {
                    Some(message) => Err(io::Error::other(message.clone()).into()),
                    None => Ok(()),
                }
            })
        }

        fn shutdown(&self) -> EngineResult<'_, ()> {
            Box::pin(async move {
                self.shutdown_calls
                    .fetch_add(1, Ordering::SeqCst);
                self.stop
                    .notify_one();

                match &self.shutdown_error {
                    Some(message) => Err(io::Error::other(message.clone()).into()),
                    None => Ok(()),
                }
            })
        }
    }

    /// Config bound to an ephemeral loopback port, logging into `logger`.
    pub(crate) fn loopback_config(logger: Arc<CaptureLogger>) -> ServerConfig {
        ServerConfig::builder()
            .addr("127.0.0.1:0")
            .logger(logger)
            .build()
            .unwrap()
    }

    pub(crate) async fn loopback_listener() -> Listener {
        let config = loopback_config(Arc::new(CaptureLogger::default()));
        Listener::bind(&config)
            .await
            .unwrap()
    }
}
