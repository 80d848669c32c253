use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::Display;

use crate::error::Kind;

/// Category of a reported error.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ErrorKind {
    Network,
    WebSocket,
    Api,
    Validation,
    Unknown,
}

impl From<Kind> for ErrorKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Status => ErrorKind::Network,
            Kind::Validation => ErrorKind::Validation,
            Kind::WebSocket => ErrorKind::WebSocket,
            Kind::Internal => ErrorKind::Unknown,
        }
    }
}

/// One entry of the error history. Immutable once created.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    message: String,
    #[serde(rename = "type")]
    kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
    timestamp: DateTime<Utc>,
}

impl ErrorInfo {
    pub(crate) fn new(
        message: String,
        kind: ErrorKind,
        details: Option<Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message,
            kind,
            details,
            timestamp,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Structured context captured with the error, if any.
    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Localized (pt-BR) text suitable for showing to end users.
    ///
    /// Validation errors pass their own message through, every other kind maps to a
    /// fixed sentence.
    #[must_use]
    pub fn user_friendly_message(&self) -> &str {
        match self.kind {
            ErrorKind::WebSocket => {
                "Problema de conexão em tempo real. Algumas notificações podem não aparecer imediatamente."
            }
            ErrorKind::Network => "Problema de conexão com o servidor. Verifique sua internet.",
            ErrorKind::Api => "Erro no servidor. Tente novamente em alguns instantes.",
            ErrorKind::Validation => &self.message,
            ErrorKind::Unknown => "Ocorreu um erro inesperado. Tente recarregar a página.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_lowercase() {
        assert_eq!(ErrorKind::WebSocket.to_string(), "websocket");
        assert_eq!(
            serde_json::to_value(ErrorKind::Network).unwrap(),
            serde_json::json!("network")
        );
    }

    #[test]
    fn serializes_kind_as_type() {
        let info = ErrorInfo::new(
            "Notifications: Connection is closing".to_owned(),
            ErrorKind::WebSocket,
            None,
            DateTime::UNIX_EPOCH,
        );

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "websocket");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn validation_message_is_shown_verbatim() {
        let info = ErrorInfo::new(
            "Comentário não pode estar vazio".to_owned(),
            ErrorKind::Validation,
            None,
            DateTime::UNIX_EPOCH,
        );

        assert_eq!(info.user_friendly_message(), "Comentário não pode estar vazio");
    }

    #[test]
    fn unknown_kind_suggests_reload() {
        let info = ErrorInfo::new(
            "boom".to_owned(),
            ErrorKind::Unknown,
            None,
            DateTime::UNIX_EPOCH,
        );

        assert_eq!(
            info.user_friendly_message(),
            "Ocorreu um erro inesperado. Tente recarregar a página."
        );
    }
}
