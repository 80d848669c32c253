#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backoff::backoff::Backoff as _;
use futures::future::BoxFuture;
use futures::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use strum_macros::Display;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::config::{ConnectionConfig, LinearBackoff};
use super::error::{ReadyState, WsError};
use super::traits::ConnectionHandler;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PING: &str = "ping";
const PONG: &str = "pong";
const CLIENT_CLOSE_REASON: &str = "Client disconnecting";
/// How long a disconnecting manager waits for the server to acknowledge its close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const NORMAL_CLOSURE: u16 = 1000;
const NO_STATUS_RECEIVED: u16 = 1005;
const ABNORMAL_CLOSURE: u16 = 1006;

/// Instantaneous state of the socket owned by a [`ConnectionManager`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    /// No socket: never connected, or waiting for the next reconnect attempt
    #[strum(to_string = "Not connected")]
    NotConnected,
    /// Opening handshake in flight
    Connecting,
    /// Socket open
    Connected {
        /// When the connection was established
        since: std::time::Instant,
    },
    /// Closing handshake in flight after [`ConnectionManager::disconnect`]
    Closing,
    /// Disconnected for good
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Details of a socket closure, as reported to
/// [`ConnectionHandler::on_disconnect`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close code, `1006` when the connection dropped without a close frame
    pub code: u16,
    pub reason: String,
    /// Whether the closing handshake completed
    pub was_clean: bool,
}

impl CloseEvent {
    fn abnormal() -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
            was_clean: false,
        }
    }

    fn from_frame(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self {
                code: u16::from(frame.code),
                reason: frame.reason.as_str().to_owned(),
                was_clean: true,
            },
            None => Self {
                code: NO_STATUS_RECEIVED,
                reason: String::new(),
                was_clean: true,
            },
        }
    }
}

enum Command {
    Connect,
}

/// Maintains one logical connection to the notification endpoint.
///
/// The manager owns at most one socket at a time and hides transient failures behind
/// automatic reconnection:
/// - `ping` is sent as soon as the socket opens, and again one interval after each `pong`
/// - `pong` frames are consumed, every other frame is parsed as JSON and handed to
///   [`ConnectionHandler::on_message`]
/// - on close, reconnection is scheduled after `attempt * base_delay`, until the attempt
///   budget is spent; then a single terminal error is reported
/// - [`ConnectionManager::disconnect`] is final for the instance
///
/// All I/O happens on a background task; the handle is cheap to clone.
///
/// # Example
///
/// ```ignore
/// let config = ConnectionConfig::builder().user_id(7).token(token).build();
/// let manager = ConnectionManager::new(config, MyHandler);
/// manager.connect();
///
/// // Later
/// manager.disconnect();
/// manager.closed().await;
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    /// Requests for the connection task
    commands: mpsc::UnboundedSender<Command>,
    /// Watch channel receiver for state changes
    state_rx: watch::Receiver<ConnectionState>,
    /// Mirror of the reconnect counter held by the connection task
    attempts: Arc<AtomicU32>,
    /// Cancelled once the manager is disconnected
    destroyed: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager and start its connection task. No socket is opened until
    /// [`ConnectionManager::connect`] is called.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new<H: ConnectionHandler>(config: ConnectionConfig, handler: H) -> Self {
        Self::with_handler(config, Arc::new(handler))
    }

    /// Like [`ConnectionManager::new`], for a handler that is already shared.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn with_handler(config: ConnectionConfig, handler: Arc<dyn ConnectionHandler>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::NotConnected);
        let attempts = Arc::new(AtomicU32::new(0));
        let destroyed = CancellationToken::new();

        let driver = Driver {
            backoff: LinearBackoff::from(config.reconnect),
            config,
            handler,
            state_tx,
            attempts: Arc::clone(&attempts),
            destroyed: destroyed.clone(),
            phase: Phase::Idle,
            reconnect_at: None,
        };
        tokio::spawn(driver.run(command_rx));

        Self {
            commands,
            state_rx,
            attempts,
            destroyed,
        }
    }

    /// Open the socket. Does nothing while a connection is open or being opened, or after
    /// [`ConnectionManager::disconnect`]. Supersedes a pending reconnect timer.
    pub fn connect(&self) {
        if self.destroyed.is_cancelled() {
            return;
        }
        // The task only stops after being destroyed
        _ = self.commands.send(Command::Connect);
    }

    /// Stop for good: cancel any pending reconnect and close the socket with a normal
    /// closure code. Later calls to [`ConnectionManager::connect`] are no-ops.
    pub fn disconnect(&self) {
        self.destroyed.cancel();
    }

    /// Wait until a disconnected manager has finished closing its socket.
    ///
    /// Never resolves unless [`ConnectionManager::disconnect`] was called (or every handle
    /// was dropped).
    pub async fn closed(&self) {
        let mut state_rx = self.state_rx.clone();
        // An error means the task has exited, which it only does once closed
        _ = state_rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Reconnection attempts made since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

/// Lifecycle of the connection task. The socket only exists inside `Open`, the pending
/// handshake only inside `Connecting`, so there is never more than one of either.
enum Phase {
    Idle,
    Connecting {
        /// Socket URL without the token, for diagnostics
        url: String,
        handshake: BoxFuture<'static, Result<WsStream, tungstenite::Error>>,
    },
    Open {
        url: String,
        socket: WsStream,
        next_ping: Option<Instant>,
        /// Set once the server sent its close frame
        close: Option<CloseEvent>,
    },
    Destroyed,
}

enum Event {
    ConnectRequested,
    Destroyed,
    ReconnectDue,
    Handshake(Result<WsStream, tungstenite::Error>),
    Frame(Option<Result<Message, tungstenite::Error>>),
    PingDue,
}

struct Driver {
    config: ConnectionConfig,
    handler: Arc<dyn ConnectionHandler>,
    backoff: LinearBackoff,
    state_tx: watch::Sender<ConnectionState>,
    attempts: Arc<AtomicU32>,
    destroyed: CancellationToken,
    phase: Phase,
    /// The single pending reconnect, if any
    reconnect_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let destroyed = self.destroyed.clone();

        loop {
            let event = tokio::select! {
                biased;

                () = destroyed.cancelled() => Event::Destroyed,
                command = commands.recv() => match command {
                    Some(Command::Connect) => Event::ConnectRequested,
                    // Every handle is gone, nobody can observe this connection anymore
                    None => Event::Destroyed,
                },
                event = self.next_event() => event,
            };

            match event {
                Event::Destroyed => {
                    self.shutdown().await;
                    break;
                }
                Event::ConnectRequested => self.connect(),
                Event::ReconnectDue => {
                    self.reconnect_at = None;
                    self.connect();
                }
                Event::Handshake(Ok(socket)) => self.opened(socket).await,
                Event::Handshake(Err(e)) => self.handshake_failed(e),
                Event::Frame(Some(Ok(message))) => self.frame(message),
                Event::Frame(Some(Err(e))) => self.transport_failed(e),
                Event::Frame(None) => self.stream_ended(),
                Event::PingDue => self.ping().await,
            }
        }
    }

    /// Wait for whatever the current phase is waiting on.
    async fn next_event(&mut self) -> Event {
        match &mut self.phase {
            Phase::Idle => {
                wait_until(self.reconnect_at).await;
                Event::ReconnectDue
            }
            Phase::Connecting { handshake, .. } => Event::Handshake(handshake.await),
            Phase::Open {
                socket, next_ping, ..
            } => {
                let next_ping = *next_ping;
                tokio::select! {
                    frame = socket.next() => Event::Frame(frame),
                    () = wait_until(next_ping) => Event::PingDue,
                }
            }
            Phase::Destroyed => std::future::pending().await,
        }
    }

    fn connect(&mut self) {
        if !matches!(self.phase, Phase::Idle) || self.destroyed.is_cancelled() {
            #[cfg(feature = "tracing")]
            tracing::trace!("Connection already in progress, ignoring connect request");
            return;
        }

        // A manual connect supersedes a pending reconnect
        self.reconnect_at = None;

        let url = match self.config.url() {
            Ok(url) => url,
            Err(e) => {
                self.report(&WsError::Construction(e.to_string()));
                self.schedule_reconnect();
                return;
            }
        };

        let mut display_url = url.clone();
        display_url.set_query(None);
        let display_url = display_url.to_string();

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %display_url, "Connecting to notification socket");

        let request = url.to_string();
        self.phase = Phase::Connecting {
            url: display_url,
            handshake: Box::pin(async move {
                connect_async(request).await.map(|(socket, _)| socket)
            }),
        };
        self.publish(ConnectionState::Connecting);
    }

    async fn opened(&mut self, socket: WsStream) {
        let Phase::Connecting { url, .. } = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, "Notification socket connected");

        self.backoff.reset();
        self.attempts.store(0, Ordering::SeqCst);
        self.phase = Phase::Open {
            url,
            socket,
            next_ping: None,
            close: None,
        };
        self.publish(ConnectionState::Connected {
            since: std::time::Instant::now(),
        });
        self.handler.on_connect();
        self.ping().await;
    }

    fn handshake_failed(&mut self, error: tungstenite::Error) {
        let Phase::Connecting { url, .. } = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };

        self.report(&WsError::transport(ReadyState::Connecting, &url, Some(error)));
        self.closed(CloseEvent::abnormal());
    }

    fn frame(&mut self, message: Message) {
        let ping_interval = self.config.ping_interval;
        let Phase::Open {
            next_ping, close, ..
        } = &mut self.phase
        else {
            return;
        };

        match message {
            Message::Text(text) if text.as_str() == PONG => {
                *next_ping = Some(Instant::now() + ping_interval);
            }
            Message::Text(text) => match serde_json::from_str::<Value>(text.as_str()) {
                Ok(value) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(%value, "Received notification socket message");
                    self.handler.on_message(&value);
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(text = %text.as_str(), error = %e, "Failed to parse socket message");
                    self.report(&WsError::MessageParse(e));
                }
            },
            Message::Close(frame) => {
                // The reply is sent by tungstenite; the stream ends right after
                *close = Some(CloseEvent::from_frame(frame));
            }
            _ => {
                // Binary payloads and control frames carry nothing for us
            }
        }
    }

    fn transport_failed(&mut self, error: tungstenite::Error) {
        let (url, close) = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Open { url, close, .. } => (url, close),
            other => {
                self.phase = other;
                return;
            }
        };

        if let Some(event) = close {
            // Failing while the server closes is just the end of the closing handshake
            self.closed(event);
            return;
        }

        let state = ReadyState::after(&error);
        self.report(&WsError::transport(state, &url, Some(error)));
        self.closed(CloseEvent::abnormal());
    }

    fn stream_ended(&mut self) {
        if let Phase::Open { close, .. } = std::mem::replace(&mut self.phase, Phase::Idle) {
            self.closed(close.unwrap_or_else(CloseEvent::abnormal));
        }
    }

    async fn ping(&mut self) {
        let Phase::Open {
            socket, next_ping, ..
        } = &mut self.phase
        else {
            return;
        };

        *next_ping = None;
        let result = socket.send(Message::Text(PING.into())).await;
        if let Err(e) = result {
            self.transport_failed(e);
        }
    }

    /// Close path shared by every way a socket can go away.
    fn closed(&mut self, event: CloseEvent) {
        self.phase = Phase::Idle;
        self.publish(ConnectionState::NotConnected);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            code = event.code,
            reason = %event.reason,
            was_clean = event.was_clean,
            "Notification socket closed"
        );

        self.handler.on_disconnect(&event);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.destroyed.is_cancelled() {
            return;
        }

        match self.backoff.next_backoff() {
            Some(delay) => {
                let attempt = self.backoff.attempts();
                self.attempts.store(attempt, Ordering::SeqCst);
                // Replaces any earlier deadline rather than adding to it
                self.reconnect_at = Some(Instant::now() + delay);

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    attempt,
                    max_attempts = self.config.reconnect.max_attempts,
                    ?delay,
                    "Attempting to reconnect"
                );

                self.handler.on_reconnect_scheduled(attempt, delay);
            }
            None => {
                self.reconnect_at = None;

                #[cfg(feature = "tracing")]
                tracing::warn!(
                    attempts = self.backoff.attempts(),
                    "Max reconnection attempts reached"
                );

                self.report(&WsError::ReconnectExhausted {
                    attempts: self.backoff.attempts(),
                });
            }
        }
    }

    async fn shutdown(&mut self) {
        self.reconnect_at = None;

        match std::mem::replace(&mut self.phase, Phase::Destroyed) {
            Phase::Open { mut socket, .. } => {
                self.publish(ConnectionState::Closing);
                let event = timeout(CLOSE_TIMEOUT, close_socket(&mut socket))
                    .await
                    .unwrap_or_else(|_elapsed| CloseEvent::abnormal());
                self.handler.on_disconnect(&event);
            }
            Phase::Connecting { .. } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Abandoning notification socket handshake");
            }
            Phase::Idle | Phase::Destroyed => {}
        }

        self.publish(ConnectionState::Closed);
    }

    fn report(&self, error: &WsError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %error, source = ?std::error::Error::source(error), "Notification socket error");

        self.handler.on_error(error);
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

/// Send a normal closure and wait for the server's reply.
async fn close_socket(socket: &mut WsStream) -> CloseEvent {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: CLIENT_CLOSE_REASON.into(),
    };
    if socket.close(Some(frame)).await.is_err() {
        return CloseEvent::abnormal();
    }

    while let Some(message) = socket.next().await {
        match message {
            Ok(Message::Close(reply)) => return CloseEvent::from_frame(reply),
            Ok(_) => {}
            Err(_) => break,
        }
    }

    CloseEvent {
        code: NORMAL_CLOSURE,
        reason: CLIENT_CLOSE_REASON.to_owned(),
        was_clean: true,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_matches_status_labels() {
        assert_eq!(ConnectionState::NotConnected.to_string(), "Not connected");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(
            ConnectionState::Connected {
                since: std::time::Instant::now()
            }
            .to_string(),
            "Connected"
        );
        assert_eq!(ConnectionState::Closed.to_string(), "Closed");
    }

    #[test]
    fn missing_close_frame_has_no_status() {
        let event = CloseEvent::from_frame(None);
        assert_eq!(event.code, NO_STATUS_RECEIVED);
        assert!(event.was_clean);
    }

    #[test]
    fn close_frame_code_is_preserved() {
        let event = CloseEvent::from_frame(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "restarting".into(),
        }));

        assert_eq!(event.code, 1001);
        assert_eq!(event.reason, "restarting");
    }
}
