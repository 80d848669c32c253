#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[cfg(feature = "api")]
pub mod api;
pub mod clock;
pub mod error;
pub mod hub;
pub(crate) mod listeners;
pub mod report;
#[cfg(feature = "api")]
pub(crate) mod serde_helpers;
pub mod status;
pub mod ws;

#[cfg(feature = "api")]
use reqwest::Request;
#[cfg(feature = "api")]
use serde::de::DeserializeOwned;

use crate::error::Error;
pub use crate::listeners::ListenerHandle;

pub type Result<T> = std::result::Result<T, Error>;

/// Execute `request` and decode its JSON body.
///
/// Non-success statuses become [`error::Status`] errors carrying the backend's `detail`
/// message when there is one. An empty body decodes as JSON `null`.
#[cfg(feature = "api")]
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request),
        fields(
            method = %request.method(),
            path = request.url().path(),
            status_code
        )
    )
)]
async fn request<Response: DeserializeOwned>(
    client: &reqwest::Client,
    request: Request,
) -> Result<Response> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    let response = client.execute(request).await?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    let body = response.bytes().await?;

    if !status_code.is_success() {
        let message = serde_json::from_slice::<api::types::ErrorBody>(&body)
            .ok()
            .and_then(api::types::ErrorBody::message)
            .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());

        #[cfg(feature = "tracing")]
        tracing::warn!(
            status = %status_code,
            method = %method,
            path = %path,
            message = %message,
            "API request failed"
        );

        return Err(Error::status(status_code, method, path, message));
    }

    let json_value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body)?
    };

    serde_helpers::deserialize_with_warnings(json_value)
}
