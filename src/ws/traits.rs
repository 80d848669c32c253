//! Lifecycle callbacks of a [`ConnectionManager`](super::ConnectionManager).

use std::time::Duration;

use serde_json::Value;

use super::connection::CloseEvent;
use super::error::WsError;

/// Receives connection lifecycle events.
///
/// Every method defaults to a no-op. Callbacks run on the connection task, in the order
/// the events happen, so they should return quickly.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl ConnectionHandler for Printer {
///     fn on_message(&self, message: &serde_json::Value) {
///         println!("received {message}");
///     }
/// }
///
/// let manager = ConnectionManager::new(config, Printer);
/// manager.connect();
/// ```
pub trait ConnectionHandler: Send + Sync + 'static {
    /// The socket opened. The reconnect counter has already been reset.
    fn on_connect(&self) {}

    /// The socket closed, cleanly or not.
    fn on_disconnect(&self, _event: &CloseEvent) {}

    /// A frame other than `pong` was received and parsed.
    fn on_message(&self, _message: &Value) {}

    /// Something went wrong. The `Display` text of `error` is suitable for logs and banners.
    fn on_error(&self, _error: &WsError) {}

    /// Reconnection attempt `attempt` will start after `delay`.
    fn on_reconnect_scheduled(&self, _attempt: u32, _delay: Duration) {}
}
