//! Connectivity signals for status indicators.
//!
//! [`ConnectionStatusObserver`] watches an [`ErrorReporter`] and derives whether the
//! real-time connection had trouble lately; [`OfflineNotice`] debounces the hub's connected
//! flag into a "show the offline banner" signal.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bon::Builder;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

use crate::hub::NotificationHub;
use crate::listeners::ListenerHandle;
use crate::report::{ErrorInfo, ErrorKind, ErrorReporter};

/// How long the WebSocket error flag stays raised after the last WebSocket error.
pub const DEFAULT_WEBSOCKET_ERROR_WINDOW: Duration = Duration::from_secs(30);
/// How long the connection must stay down before the offline banner shows.
pub const DEFAULT_OFFLINE_GRACE: Duration = Duration::from_secs(3);
const MAX_TRACKED_ERRORS: usize = 5;

type RetryAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Settings of a [`ConnectionStatusObserver`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Builder)]
pub struct ObserverConfig {
    /// Connectivity reported by the platform at startup
    #[builder(default = true)]
    pub initially_online: bool,
    #[builder(default = DEFAULT_WEBSOCKET_ERROR_WINDOW)]
    pub websocket_error_window: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Derives UI-facing connectivity signals from reported errors.
///
/// - online/offline, as fed by [`ConnectionStatusObserver::set_online`]
/// - whether a WebSocket error happened within the last 30 seconds
/// - the last five errors, most recent first
///
/// Must be created inside a tokio runtime. Dropping the observer detaches it from the
/// reporter.
pub struct ConnectionStatusObserver {
    state: Arc<State>,
    retry: RetryAction,
    listener: Option<ListenerHandle>,
}

struct State {
    reporter: ErrorReporter,
    online: AtomicBool,
    websocket_errors: watch::Sender<bool>,
    /// Bumped on every raise, under the watch lock, so a stale deadline cannot lower the
    /// flag over a newer error
    raises: AtomicU64,
    errors: Mutex<VecDeque<ErrorInfo>>,
}

impl State {
    /// Raise the WebSocket error flag and return the raise count.
    fn raise(&self) -> u64 {
        let mut count = 0;
        self.websocket_errors.send_modify(|raised| {
            count = self.raises.fetch_add(1, Ordering::SeqCst) + 1;
            *raised = true;
        });
        count
    }

    /// Lower the flag unless it was raised again after raise number `armed`.
    fn lower_if_unchanged(&self, armed: u64) -> bool {
        self.websocket_errors.send_if_modified(|raised| {
            if *raised && self.raises.load(Ordering::SeqCst) == armed {
                *raised = false;
                true
            } else {
                false
            }
        })
    }
}

impl ConnectionStatusObserver {
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(reporter: ErrorReporter, initially_online: bool) -> Self {
        Self::with_config(
            reporter,
            ObserverConfig::builder()
                .initially_online(initially_online)
                .build(),
        )
    }

    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn with_config(reporter: ErrorReporter, config: ObserverConfig) -> Self {
        let (websocket_errors, _) = watch::channel(false);
        let state = Arc::new(State {
            reporter: reporter.clone(),
            online: AtomicBool::new(config.initially_online),
            websocket_errors,
            raises: AtomicU64::new(0),
            errors: Mutex::new(VecDeque::with_capacity(MAX_TRACKED_ERRORS)),
        });

        let (raised_tx, raised_rx) = mpsc::unbounded_channel();
        tokio::spawn(lower_after_quiet(
            Arc::downgrade(&state),
            raised_rx,
            config.websocket_error_window,
        ));

        let weak = Arc::downgrade(&state);
        let listener = reporter.add_listener(move |error| {
            let Some(state) = weak.upgrade() else {
                return;
            };

            {
                let mut errors = state.errors.lock().unwrap_or_else(PoisonError::into_inner);
                errors.push_front(error.clone());
                errors.truncate(MAX_TRACKED_ERRORS);
            }

            if error.kind() == ErrorKind::WebSocket {
                _ = raised_tx.send(state.raise());
            }
        });

        Self {
            state,
            retry: Arc::new(|| {
                Box::pin(async {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("No retry action configured");
                })
            }),
            listener: Some(listener),
        }
    }

    /// Make [`ConnectionStatusObserver::retry`] restart the hub's current session.
    #[must_use]
    pub fn with_hub(self, hub: NotificationHub) -> Self {
        self.with_retry(move || {
            let hub = hub.clone();
            async move {
                hub.reconnect().await;
            }
        })
    }

    /// Use a custom action for [`ConnectionStatusObserver::retry`].
    #[must_use]
    pub fn with_retry<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.retry = Arc::new(move || Box::pin(action()));
        self
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state.online.load(Ordering::SeqCst)
    }

    /// Feed the platform's connectivity status.
    pub fn set_online(&self, online: bool) {
        self.state.online.store(online, Ordering::SeqCst);
    }

    #[must_use]
    pub fn has_websocket_errors(&self) -> bool {
        *self.state.websocket_errors.borrow()
    }

    /// Subscribe to the WebSocket error flag.
    #[must_use]
    pub fn websocket_errors_receiver(&self) -> watch::Receiver<bool> {
        self.state.websocket_errors.subscribe()
    }

    /// The last errors seen, most recent first.
    #[must_use]
    pub fn errors(&self) -> Vec<ErrorInfo> {
        self.state
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn has_recent_errors(&self) -> bool {
        !self
            .state
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Forget the tracked errors, here and in the reporter's history.
    pub fn clear_errors(&self) {
        self.state
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.state.reporter.clear_errors();
    }

    /// Run the retry action.
    pub async fn retry(&self) {
        (self.retry)().await;
    }
}

impl Drop for ConnectionStatusObserver {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.remove();
        }
    }
}

impl fmt::Debug for ConnectionStatusObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStatusObserver")
            .field("online", &self.is_online())
            .field("websocket_errors", &self.has_websocket_errors())
            .field("errors", &self.errors().len())
            .finish_non_exhaustive()
    }
}

/// Lower the WebSocket error flag once `window` passed without a new WebSocket error.
async fn lower_after_quiet(
    state: std::sync::Weak<State>,
    mut raised: mpsc::UnboundedReceiver<u64>,
    window: Duration,
) {
    let mut deadline = None;
    let mut armed = 0;

    loop {
        tokio::select! {
            biased;

            signal = raised.recv() => match signal {
                Some(count) => {
                    armed = armed.max(count);
                    deadline = Some(Instant::now() + window);
                }
                None => break,
            },
            () = wait_until(deadline) => {
                deadline = None;
                let Some(state) = state.upgrade() else {
                    break;
                };
                state.lower_if_unchanged(armed);
            }
        }
    }
}

/// Debounced "connection lost" signal.
///
/// Becomes visible once the watched connected flag has been `false` for the whole grace
/// period and hides as soon as it turns `true`.
#[derive(Clone, Debug)]
pub struct OfflineNotice {
    visible: watch::Receiver<bool>,
}

impl OfflineNotice {
    /// Start watching `connected`, typically [`NotificationHub::connected_receiver`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(connected: watch::Receiver<bool>, grace: Duration) -> Self {
        let (visible_tx, visible) = watch::channel(false);
        tokio::spawn(debounce_offline(connected, visible_tx, grace));
        Self { visible }
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    #[must_use]
    pub fn receiver(&self) -> watch::Receiver<bool> {
        self.visible.clone()
    }
}

async fn debounce_offline(
    mut connected: watch::Receiver<bool>,
    visible: watch::Sender<bool>,
    grace: Duration,
) {
    let mut deadline = None;

    loop {
        if *connected.borrow_and_update() {
            deadline = None;
            visible.send_if_modified(|shown| std::mem::replace(shown, false));
        } else if deadline.is_none() && !*visible.borrow() {
            deadline = Some(Instant::now() + grace);
        }

        tokio::select! {
            biased;

            () = visible.closed() => break,
            changed = connected.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = wait_until(deadline) => {
                deadline = None;
                visible.send_replace(true);
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
