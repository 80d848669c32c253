//! Centralized error history and classification.
//!
//! Every subsystem funnels its failures through an [`ErrorReporter`]: the reporter
//! timestamps them, keeps the most recent ones, mirrors them to the log and notifies its
//! listeners synchronously.
//!
//! # Example
//!
//! ```
//! use feed_notify::report::{ErrorKind, ErrorReporter};
//!
//! let reporter = ErrorReporter::new();
//! let _handle = reporter.add_listener(|error| println!("{}", error.user_friendly_message()));
//!
//! reporter.log_error("Feed: request timed out", ErrorKind::Network, None);
//!
//! assert_eq!(reporter.recent_errors(10).len(), 1);
//! assert!(reporter.has_recent_errors(ErrorKind::Network, ErrorReporter::DEFAULT_RECENT_WINDOW));
//! ```

pub mod types;

use std::cell::Cell;
use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::Duration;

use chrono::TimeDelta;
use serde_json::{Value, json};

pub use types::{ErrorInfo, ErrorKind};

use crate::clock::{Clock, SystemClock};
use crate::error::Status;
use crate::listeners::{ListenerHandle, Listeners, panic_message};
use crate::ws::{ReadyState, WsError};

const MAX_ERRORS: usize = 50;
const CONNECTION_FAILURE_MESSAGE: &str =
    "Unable to connect to server. Please check your internet connection.";

static PANIC_HOOK: Once = Once::new();

thread_local! {
    /// Set while the panic hook is reporting, so panics raised by listeners are not
    /// reported again.
    static REPORTING_PANIC: Cell<bool> = const { Cell::new(false) };
}

/// Bounded, most-recent-first history of classified errors.
///
/// Cloning is cheap and every clone shares the same history and listeners.
#[derive(Clone)]
pub struct ErrorReporter {
    inner: Arc<Inner>,
}

struct Inner {
    history: Mutex<VecDeque<ErrorInfo>>,
    listeners: Listeners<ErrorInfo>,
    clock: Arc<dyn Clock>,
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("errors", &self.history().len())
            .field("listeners", &self.inner.listeners.len())
            .finish_non_exhaustive()
    }
}

impl ErrorReporter {
    /// Default number of entries returned by [`ErrorReporter::recent_errors`] callers.
    pub const DEFAULT_RECENT_LIMIT: usize = 10;
    /// Default look-back window for [`ErrorReporter::has_recent_errors`].
    pub const DEFAULT_RECENT_WINDOW: Duration = Duration::from_secs(5 * 60);

    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// A reporter that timestamps errors with `clock`.
    #[must_use]
    pub fn with_clock<C: Clock>(clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                history: Mutex::new(VecDeque::with_capacity(MAX_ERRORS)),
                listeners: Listeners::new(),
                clock: Arc::new(clock),
            }),
        }
    }

    /// Record an error, evicting the oldest entry past the history capacity, and notify
    /// every listener.
    pub fn log_error<S: Into<String>>(
        &self,
        message: S,
        kind: ErrorKind,
        details: Option<Value>,
    ) -> ErrorInfo {
        let info = ErrorInfo::new(message.into(), kind, details, self.inner.clock.now());

        #[cfg(feature = "tracing")]
        tracing::error!(
            kind = %kind,
            details = ?info.details(),
            "[{}] {}",
            kind.to_string().to_uppercase(),
            info.message()
        );

        {
            let mut history = self.history();
            history.push_front(info.clone());
            history.truncate(MAX_ERRORS);
        }

        self.inner.listeners.notify(&info);
        info
    }

    /// Record a WebSocket transport failure, worded after the socket state at the time.
    ///
    /// `state` is `None` when the failing socket could not be inspected.
    pub fn report_transport_error(
        &self,
        state: Option<ReadyState>,
        url: Option<&str>,
        context: &str,
    ) -> ErrorInfo {
        let message = match state {
            Some(ReadyState::Connecting) => format!("{context}: Unable to connect to server"),
            Some(ReadyState::Closing) => format!("{context}: Connection is closing"),
            Some(ReadyState::Closed) => format!("{context}: Connection has been closed"),
            Some(ReadyState::Open) => format!("{context}: Unknown connection error"),
            None => format!("{context} connection error"),
        };

        self.log_error(
            message,
            ErrorKind::WebSocket,
            Some(json!({
                "readyState": state,
                "url": url,
                "event": "error",
            })),
        )
    }

    /// Record an error raised by a [`ConnectionManager`](crate::ws::ConnectionManager).
    pub fn report_ws_error(&self, error: &WsError, context: &str) -> ErrorInfo {
        match error {
            WsError::Transport { state, url, .. } => {
                self.report_transport_error(Some(*state), Some(url), context)
            }
            other => self.log_error(
                other.to_string(),
                ErrorKind::WebSocket,
                other.source().map(|source| json!({ "error": source.to_string() })),
            ),
        }
    }

    /// Record a failed request.
    ///
    /// Connection failures and timeouts of the HTTP stack get a generic "check your
    /// internet connection" message, errors carrying an HTTP status are summarized as
    /// `<context> error: <code> <reason>`, anything else as `<context>: <error>`.
    pub fn report_network_error(
        &self,
        error: &(dyn StdError + 'static),
        context: &str,
    ) -> ErrorInfo {
        let message = network_message(error, context);
        self.log_error(
            message,
            ErrorKind::Network,
            Some(json!({ "error": error.to_string() })),
        )
    }

    #[must_use]
    pub fn user_friendly_message<'info>(&self, info: &'info ErrorInfo) -> &'info str {
        info.user_friendly_message()
    }

    /// Register a listener called synchronously for every new error, in registration
    /// order. A panicking listener does not prevent later ones from running.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ErrorInfo) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    /// Up to `limit` errors, most recent first.
    #[must_use]
    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorInfo> {
        self.history().iter().take(limit).cloned().collect()
    }

    /// Empty the history. Listeners stay registered.
    pub fn clear_errors(&self) {
        self.history().clear();
    }

    /// Whether an error of `kind` was recorded strictly after `now - within`.
    #[must_use]
    pub fn has_recent_errors(&self, kind: ErrorKind, within: Duration) -> bool {
        let within = TimeDelta::from_std(within).unwrap_or(TimeDelta::MAX);
        let Some(cutoff) = self.inner.clock.now().checked_sub_signed(within) else {
            return self.history().iter().any(|error| error.kind() == kind);
        };

        self.history()
            .iter()
            .any(|error| error.kind() == kind && error.timestamp() > cutoff)
    }

    /// Report panics of the whole process to this reporter as [`ErrorKind::Unknown`].
    ///
    /// Only the first call installs the hook; the previously installed hook still runs
    /// after reporting.
    pub fn install_panic_hook(&self) {
        let reporter = self.clone();
        PANIC_HOOK.call_once(move || {
            let previous = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                let reentrant = REPORTING_PANIC.with(|flag| flag.replace(true));
                if !reentrant {
                    let details = info.location().map(|location| {
                        json!({
                            "filename": location.file(),
                            "lineno": location.line(),
                            "colno": location.column(),
                        })
                    });
                    reporter.log_error(panic_message(info.payload()), ErrorKind::Unknown, details);
                    REPORTING_PANIC.with(|flag| flag.set(false));
                }
                previous(info);
            }));
        });
    }

    fn history(&self) -> std::sync::MutexGuard<'_, VecDeque<ErrorInfo>> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn network_message(error: &(dyn StdError + 'static), context: &str) -> String {
    let mut current = Some(error);
    while let Some(error) = current {
        if let Some(status) = error.downcast_ref::<Status>() {
            return status_message(context, status.status_code);
        }
        if let Some(error) = error.downcast_ref::<reqwest::Error>() {
            if error.is_connect() || error.is_timeout() {
                return CONNECTION_FAILURE_MESSAGE.to_owned();
            }
            if let Some(status_code) = error.status() {
                return status_message(context, status_code);
            }
        }
        current = error.source();
    }

    let text = error.to_string();
    if text.is_empty() {
        format!("{context} error")
    } else {
        format!("{context}: {text}")
    }
}

fn status_message(context: &str, status_code: reqwest::StatusCode) -> String {
    match status_code.canonical_reason() {
        Some(reason) => format!("{context} error: {} {reason}", status_code.as_u16()),
        None => format!("{context} error: {}", status_code.as_u16()),
    }
}
