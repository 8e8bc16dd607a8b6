//! Logger capability used by the lifecycle coordinator and the process forker.

use log::info;

/// Line-oriented logger handed to the lifecycle components.
///
/// The default implementation forwards to the [`log`] facade; tests and
/// embedders can plug in their own sink.
pub trait Logger: Send + Sync + 'static {
    /// Prints one informational line.
    fn print(&self, message: &str);
}

/// Logger that forwards every line to `log::info!`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultLogger;

impl Logger for DefaultLogger {
    fn print(&self, message: &str) {
        info!("{}", message);
    }
}
