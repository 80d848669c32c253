#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::fmt;
use std::time::Duration;

use backoff::backoff::Backoff;
use bon::Builder;
use secrecy::{ExposeSecret as _, SecretString};
use url::Url;

use crate::Result;

pub(crate) const DEFAULT_ENDPOINT: &str = "ws://localhost:8000";
const DEFAULT_PING_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_millis(3000);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Parameters of one notification connection.
///
/// ```
/// use std::time::Duration;
/// use feed_notify::ws::config::ConnectionConfig;
///
/// let config = ConnectionConfig::builder()
///     .user_id(7)
///     .token("abc".to_owned())
///     .build();
///
/// assert_eq!(config.reconnect.max_attempts, 5);
/// assert_eq!(config.reconnect.base_delay, Duration::from_secs(3));
/// assert_eq!(config.url()?.as_str(), "ws://localhost:8000/ws/7?token=abc");
/// # Ok::<(), feed_notify::error::Error>(())
/// ```
#[non_exhaustive]
#[derive(Clone, Builder)]
pub struct ConnectionConfig {
    /// Identifier of the user whose notifications are streamed
    pub user_id: u64,
    /// Auth token, sent as the `token` query parameter
    #[builder(into)]
    pub token: SecretString,
    /// Base of the notification endpoint, e.g. `ws://localhost:8000`
    #[builder(into, default = DEFAULT_ENDPOINT.to_owned())]
    pub endpoint: String,
    /// Interval between keepalive pings, counted from the last `pong`
    #[builder(default = DEFAULT_PING_INTERVAL_DURATION)]
    pub ping_interval: Duration,
    /// Reconnection policy
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl ConnectionConfig {
    /// The socket URL: `<endpoint>/ws/<user_id>?token=<urlencoded token>`.
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/ws/{}",
            self.endpoint.trim_end_matches('/'),
            self.user_id
        ))?;
        url.query_pairs_mut()
            .append_pair("token", self.token.expose_secret());
        Ok(url)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("user_id", &self.user_id)
            .field("token", &self.token)
            .field("endpoint", &self.endpoint)
            .field("ping_interval", &self.ping_interval)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Reconnection attempts allowed since the last successful open
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n * base_delay`
    pub base_delay: Duration,
}

impl ReconnectConfig {
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_DURATION)
    }
}

impl From<ReconnectConfig> for LinearBackoff {
    fn from(config: ReconnectConfig) -> Self {
        LinearBackoff {
            base_delay: config.base_delay,
            max_attempts: config.max_attempts,
            attempts: 0,
        }
    }
}

/// Backoff growing linearly with the attempt count: `base`, `2 * base`, `3 * base`, ...
///
/// Yields `None` once `max_attempts` delays have been handed out since the last reset.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base_delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl LinearBackoff {
    /// Number of delays handed out since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.attempts = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }

        self.attempts += 1;
        Some(self.base_delay.saturating_mul(self.attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: &str) -> ConnectionConfig {
        ConnectionConfig::builder()
            .user_id(42)
            .token(token.to_owned())
            .endpoint("ws://feed.test:8000/")
            .build()
    }

    #[test]
    fn backoff_sequence_is_linear() {
        let mut backoff: LinearBackoff = ReconnectConfig::default().into();

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_backoff()).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(3),
                Duration::from_secs(6),
                Duration::from_secs(9),
                Duration::from_secs(12),
                Duration::from_secs(15),
            ]
        );
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn backoff_reset_starts_over() {
        let mut backoff: LinearBackoff =
            ReconnectConfig::new(2, Duration::from_millis(100)).into();

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), None);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn zero_attempts_never_backs_off() {
        let mut backoff: LinearBackoff = ReconnectConfig::new(0, Duration::from_secs(1)).into();
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn url_encodes_token() {
        let url = config("a b&c=d/é").url().unwrap();

        assert_eq!(url.path(), "/ws/42");
        assert_eq!(
            url.query_pairs().find(|(k, _)| k == "token").unwrap().1,
            "a b&c=d/é"
        );
        assert!(!url.as_str().contains("a b"));
    }

    #[test]
    fn invalid_endpoint_is_an_error() {
        let config = ConnectionConfig::builder()
            .user_id(1)
            .token("t".to_owned())
            .endpoint("not a url")
            .build();

        config.url().unwrap_err();
    }

    #[test]
    fn debug_redacts_token() {
        let rendered = format!("{:?}", config("super-secret"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn default_ping_interval_is_thirty_seconds() {
        assert_eq!(config("t").ping_interval, Duration::from_secs(30));
    }
}
