//! Resilient WebSocket connection to the notification endpoint.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: owns at most one socket, runs the `ping`/`pong` keepalive and
//!   reconnects with linear backoff
//! - [`ConnectionHandler`]: lifecycle callbacks (open, close, message, error)
//! - [`ConnectionConfig`]: endpoint, credentials and reconnection policy
//!
//! # Example
//!
//! ```ignore
//! let config = ConnectionConfig::builder().user_id(7).token(token).build();
//! let manager = ConnectionManager::new(config, MyHandler);
//! manager.connect();
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod traits;

pub use config::{ConnectionConfig, ReconnectConfig};
pub use connection::{CloseEvent, ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use error::ReadyState;
pub use traits::*;
