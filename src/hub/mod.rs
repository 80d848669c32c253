//! Process-wide notification fan-out.
//!
//! A [`NotificationHub`] owns one [`ConnectionManager`] per login session, keeps only
//! messages of type `notification` and hands them to its listeners in registration order.
//! Connection failures are forwarded to the [`ErrorReporter`] it was built with.
//!
//! # Example
//!
//! ```no_run
//! use feed_notify::hub::NotificationHub;
//! use feed_notify::report::ErrorReporter;
//!
//! # async fn example() {
//! let hub = NotificationHub::new(ErrorReporter::new());
//! let _handle = hub.add_listener(|notification| println!("{:?}", notification.data));
//!
//! hub.connect(7, "token".to_owned()).await;
//! // ...
//! hub.disconnect().await;
//! # }
//! ```

pub mod types;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize as _;
use serde_json::Value;
use tokio::sync::watch;

pub use types::{InboundMessage, Notification};

use crate::listeners::{ListenerHandle, Listeners};
use crate::report::ErrorReporter;
use crate::ws::config::DEFAULT_ENDPOINT;
use crate::ws::{
    CloseEvent, ConnectionConfig, ConnectionHandler, ConnectionManager, ConnectionState,
    WsError,
};

const ERROR_CONTEXT: &str = "Notifications";

/// Shared notification hub. Clones share the same session and listeners.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<Inner>,
}

struct Inner {
    reporter: ErrorReporter,
    endpoint: String,
    listeners: Listeners<Notification>,
    connected: watch::Sender<bool>,
    /// Incremented for every new session; callbacks of older sessions are ignored
    generation: AtomicU64,
    /// Serializes connect, reconnect and disconnect
    session: tokio::sync::Mutex<()>,
    manager: Mutex<Option<ConnectionManager>>,
    credentials: Mutex<Option<Credentials>>,
}

#[derive(Clone)]
struct Credentials {
    user_id: u64,
    token: SecretString,
}

impl NotificationHub {
    /// A hub for the default endpoint (`ws://localhost:8000`).
    #[must_use]
    pub fn new(reporter: ErrorReporter) -> Self {
        Self::with_endpoint(reporter, DEFAULT_ENDPOINT)
    }

    #[must_use]
    pub fn with_endpoint<S: Into<String>>(reporter: ErrorReporter, endpoint: S) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                reporter,
                endpoint: endpoint.into(),
                listeners: Listeners::new(),
                connected,
                generation: AtomicU64::new(0),
                session: tokio::sync::Mutex::new(()),
                manager: Mutex::new(None),
                credentials: Mutex::new(None),
            }),
        }
    }

    /// Start a session for `user_id`.
    ///
    /// Any previous session is disconnected, and fully closed, before the new connection
    /// is opened.
    pub async fn connect<T: Into<SecretString>>(&self, user_id: u64, token: T) {
        let credentials = Credentials {
            user_id,
            token: token.into(),
        };

        let _session = self.inner.session.lock().await;
        *lock(&self.inner.credentials) = Some(credentials.clone());
        self.start(credentials).await;
    }

    /// Start over with the credentials of the current session, e.g. after the connection
    /// gave up reconnecting. Returns `false` when there is no session to restart.
    pub async fn reconnect(&self) -> bool {
        let _session = self.inner.session.lock().await;
        let Some(credentials) = lock(&self.inner.credentials).clone() else {
            #[cfg(feature = "tracing")]
            tracing::debug!("No notification session to reconnect");
            return false;
        };

        self.start(credentials).await;
        true
    }

    /// End the current session, if any, and wait for its socket to close.
    pub async fn disconnect(&self) {
        let _session = self.inner.session.lock().await;
        lock(&self.inner.credentials).take();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_current().await;
        self.inner.connected.send_replace(false);
    }

    /// Register a listener for notifications. Listeners run in registration order on the
    /// connection task; a panicking listener is logged and does not affect the others.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    /// Whether the session's socket is open, as seen by both the connection callbacks and
    /// the connection itself.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
            && lock(&self.inner.manager)
                .as_ref()
                .is_some_and(ConnectionManager::is_connected)
    }

    /// State of the current session's connection.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.inner.manager)
            .as_ref()
            .map_or(ConnectionState::NotConnected, ConnectionManager::connection_state)
    }

    /// Subscribe to the connected flag.
    #[must_use]
    pub fn connected_receiver(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    #[must_use]
    pub fn reporter(&self) -> &ErrorReporter {
        &self.inner.reporter
    }

    async fn start(&self, credentials: Credentials) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.stop_current().await;
        self.inner.connected.send_replace(false);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            user_id = credentials.user_id,
            generation,
            "Starting notification session"
        );

        let config = ConnectionConfig::builder()
            .user_id(credentials.user_id)
            .token(credentials.token)
            .endpoint(self.inner.endpoint.clone())
            .build();
        let handler = SessionHandler {
            hub: Arc::downgrade(&self.inner),
            generation,
        };

        let manager = ConnectionManager::new(config, handler);
        manager.connect();
        *lock(&self.inner.manager) = Some(manager);
    }

    async fn stop_current(&self) {
        let previous = lock(&self.inner.manager).take();
        if let Some(previous) = previous {
            previous.disconnect();
            previous.closed().await;
        }
    }
}

impl fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHub")
            .field("endpoint", &self.inner.endpoint)
            .field("connected", &*self.inner.connected.borrow())
            .field("listeners", &self.inner.listeners.len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn route(&self, message: &Value) {
        match InboundMessage::deserialize(message) {
            Ok(InboundMessage::Notification(notification)) => {
                self.listeners.notify(&notification);
            }
            Ok(InboundMessage::Other) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(%message, "Dropping non-notification message");
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(%message, error = %e, "Dropping unrecognized message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }
}

/// Connection callbacks of one session.
struct SessionHandler {
    hub: Weak<Inner>,
    generation: u64,
}

impl SessionHandler {
    /// The hub, unless it is gone or has moved on to a newer session.
    fn hub(&self) -> Option<Arc<Inner>> {
        let hub = self.hub.upgrade()?;
        (hub.generation.load(Ordering::SeqCst) == self.generation).then_some(hub)
    }
}

impl ConnectionHandler for SessionHandler {
    fn on_connect(&self) {
        if let Some(hub) = self.hub() {
            hub.connected.send_replace(true);
        }
    }

    fn on_disconnect(&self, _event: &CloseEvent) {
        if let Some(hub) = self.hub() {
            hub.connected.send_replace(false);
        }
    }

    fn on_message(&self, message: &Value) {
        if let Some(hub) = self.hub() {
            hub.route(message);
        }
    }

    fn on_error(&self, error: &WsError) {
        let Some(hub) = self.hub() else {
            return;
        };

        hub.reporter.report_ws_error(error, ERROR_CONTEXT);
        if error.is_connection_loss() {
            hub.connected.send_replace(false);
        }
    }

    fn on_reconnect_scheduled(&self, attempt: u32, delay: Duration) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            attempt,
            ?delay,
            generation = self.generation,
            "Notification reconnect scheduled"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = (attempt, delay);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
