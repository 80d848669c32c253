#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use serde_repr::{Deserialize_repr, Serialize_repr};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::ProtocolError;

/// State of the socket at the moment an error was observed, numbered like the
/// WebSocket `readyState` attribute.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    /// Best guess at the socket state after a read or write failed with `error`.
    pub(crate) fn after(error: &tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Io(_)
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                Self::Closed
            }
            _ => Self::Open,
        }
    }
}

/// WebSocket error variants.
///
/// The `Display` output is the human-readable reason handed to
/// [`ConnectionHandler::on_error`](super::ConnectionHandler::on_error).
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// The transport failed while in `state`
    Transport {
        state: ReadyState,
        url: String,
        source: Option<tungstenite::Error>,
    },
    /// A frame other than `pong` was not valid JSON
    MessageParse(serde_json::Error),
    /// The socket could not even be created (e.g. the endpoint URL is invalid)
    Construction(String),
    /// The reconnect budget is spent; nothing more will be attempted
    ReconnectExhausted {
        /// Attempts made since the last successful open
        attempts: u32,
    },
}

impl WsError {
    pub(crate) fn transport(
        state: ReadyState,
        url: &str,
        source: Option<tungstenite::Error>,
    ) -> Self {
        Self::Transport {
            state,
            url: url.to_owned(),
            source,
        }
    }

    /// Ready state of the socket for transport errors.
    #[must_use]
    pub fn ready_state(&self) -> Option<ReadyState> {
        match self {
            Self::Transport { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// Whether this error means the connection is (or stays) down.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        !matches!(self, Self::MessageParse(_))
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { state, .. } => match state {
                ReadyState::Connecting => write!(
                    f,
                    "Unable to connect to the server. Please check your internet connection."
                ),
                ReadyState::Closing => write!(f, "Connection is being closed."),
                ReadyState::Closed => {
                    write!(f, "Connection has been closed. Attempting to reconnect...")
                }
                ReadyState::Open => write!(f, "An unknown WebSocket error occurred."),
            },
            Self::MessageParse(_) => write!(f, "Failed to parse message from server"),
            Self::Construction(reason) => {
                write!(f, "Failed to create WebSocket connection: {reason}")
            }
            Self::ReconnectExhausted { .. } => write!(
                f,
                "Unable to maintain connection to the server. Please refresh the page."
            ),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Transport {
                source: Some(e), ..
            } => Some(e),
            Self::MessageParse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_messages_follow_ready_state() {
        let message =
            |state| WsError::transport(state, "ws://localhost:8000/ws/1", None).to_string();

        assert_eq!(
            message(ReadyState::Connecting),
            "Unable to connect to the server. Please check your internet connection."
        );
        assert_eq!(message(ReadyState::Closing), "Connection is being closed.");
        assert_eq!(
            message(ReadyState::Closed),
            "Connection has been closed. Attempting to reconnect..."
        );
        assert_eq!(
            message(ReadyState::Open),
            "An unknown WebSocket error occurred."
        );
    }

    #[test]
    fn ready_state_serializes_as_number() {
        assert_eq!(serde_json::to_string(&ReadyState::Closing).unwrap(), "2");
    }

    #[test]
    fn parse_errors_do_not_count_as_connection_loss() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();

        assert!(!WsError::MessageParse(parse).is_connection_loss());
        assert!(WsError::ReconnectExhausted { attempts: 5 }.is_connection_loss());
    }

    #[test]
    fn converts_into_websocket_kind_error() {
        let error = crate::error::Error::from(WsError::ReconnectExhausted { attempts: 5 });

        assert_eq!(error.kind(), crate::error::Kind::WebSocket);
        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::ReconnectExhausted { attempts: 5 })
        ));
    }

    #[test]
    fn io_failures_leave_the_socket_closed() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionReset);

        assert_eq!(
            ReadyState::after(&tungstenite::Error::Io(io)),
            ReadyState::Closed
        );
        assert_eq!(
            ReadyState::after(&tungstenite::Error::Protocol(
                ProtocolError::ResetWithoutClosingHandshake
            )),
            ReadyState::Closed
        );
        assert_eq!(
            ReadyState::after(&tungstenite::Error::Protocol(
                ProtocolError::UnmaskedFrameFromClient
            )),
            ReadyState::Open
        );
    }
}
