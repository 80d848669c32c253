use reqwest::{
    Client as ReqwestClient, Method, Request,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use secrecy::{ExposeSecret as _, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use super::types::{BookmarkResponse, CommentRequest, ReactionRequest, ShareRequest, ShareType};
use crate::Result;
use crate::error::{Error, Kind, Validation};
use crate::report::{ErrorKind, ErrorReporter};

const DEFAULT_HOST: &str = "http://localhost:8000";
const ERROR_CONTEXT: &str = "API";
const EMPTY_COMMENT: &str = "Comentário não pode estar vazio";

/// Client for the post interaction endpoints of the feed backend.
///
/// Every call is authenticated with the bearer token the client was created with. When a
/// reporter is attached, failures are also recorded there.
///
/// # Example
///
/// ```no_run
/// use feed_notify::api::{Client, types::ShareType};
/// use feed_notify::report::ErrorReporter;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new("http://localhost:8000", "token".to_owned())?
///     .with_reporter(ErrorReporter::new());
///
/// client.toggle_post_reaction(12, "love").await?;
/// client.share_post(12, ShareType::Timeline).await?;
/// let comments = client.post_comments(12).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    host: Url,
    client: ReqwestClient,
    token: SecretString,
    reporter: Option<ErrorReporter>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.host.as_str())
            .field("token", &self.token)
            .field("reporter", &self.reporter.is_some())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client for `host` authenticating as the owner of `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host URL is invalid or the HTTP client fails to build.
    pub fn new<T: Into<SecretString>>(host: &str, token: T) -> Result<Client> {
        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("feed_notify"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        let client = ReqwestClient::builder().default_headers(headers).build()?;

        Ok(Self {
            host: Url::parse(host)?,
            client,
            token: token.into(),
            reporter: None,
        })
    }

    /// Creates a client for the default host (`http://localhost:8000`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn with_token<T: Into<SecretString>>(token: T) -> Result<Client> {
        Self::new(DEFAULT_HOST, token)
    }

    /// Record failures of this client in `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Returns the host URL for the client.
    #[must_use]
    pub fn host(&self) -> &Url {
        &self.host
    }

    /// React to a post. The backend toggles the reaction off when it is already set.
    pub async fn toggle_post_reaction(&self, post_id: u64, reaction_type: &str) -> Result<Value> {
        let request = self
            .authorized(Method::POST, &format!("posts/{post_id}/reactions"))?
            .json(&ReactionRequest::new(reaction_type))
            .build()?;

        self.send(request).await
    }

    /// Remove the current user's reaction from a post.
    pub async fn remove_post_reaction(&self, post_id: u64) -> Result<Value> {
        let request = self
            .authorized(Method::DELETE, &format!("posts/{post_id}/reactions"))?
            .build()?;

        self.send(request).await
    }

    /// The current user's reaction to a post, `None` when there is none.
    pub async fn user_reaction(&self, post_id: u64) -> Result<Option<Value>> {
        let request = self
            .authorized(Method::GET, &format!("posts/{post_id}/user-reaction"))?
            .build()?;

        self.send(request).await
    }

    /// Add a comment. Blank content is rejected without calling the backend.
    pub async fn add_comment(&self, comment: &CommentRequest) -> Result<Value> {
        if comment.content.trim().is_empty() {
            let error = Error::validation(EMPTY_COMMENT);
            self.report(&error);
            return Err(error);
        }

        let request = self
            .authorized(Method::POST, "comments/")?
            .json(comment)
            .build()?;

        self.send(request).await
    }

    /// Comments of a post, as returned by the backend.
    pub async fn post_comments(&self, post_id: u64) -> Result<Vec<Value>> {
        let request = self
            .authorized(Method::GET, &format!("posts/{post_id}/comments"))?
            .build()?;

        self.send(request).await
    }

    pub async fn like_comment(&self, comment_id: u64) -> Result<Value> {
        let request = self
            .authorized(Method::POST, &format!("comments/{comment_id}/reactions"))?
            .json(&ReactionRequest::like())
            .build()?;

        self.send(request).await
    }

    pub async fn share_post(&self, post_id: u64, share_type: ShareType) -> Result<Value> {
        let request = self
            .authorized(Method::POST, &format!("posts/{post_id}/share"))?
            .json(&ShareRequest::new(share_type))
            .build()?;

        self.send(request).await
    }

    /// Save or unsave a post.
    pub async fn toggle_bookmark(&self, post_id: u64) -> Result<BookmarkResponse> {
        let request = self
            .authorized(Method::POST, &format!("posts/{post_id}/bookmark"))?
            .build()?;

        self.send(request).await
    }

    fn authorized(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))?;
        bearer.set_sensitive(true);

        Ok(self
            .client
            .request(method, self.host.join(path)?)
            .header(AUTHORIZATION, bearer))
    }

    async fn send<Response: DeserializeOwned>(&self, request: Request) -> Result<Response> {
        crate::request(&self.client, request)
            .await
            .inspect_err(|e| self.report(e))
    }

    fn report(&self, error: &Error) {
        let Some(reporter) = &self.reporter else {
            return;
        };

        match error.kind() {
            Kind::Validation => {
                let reason = error
                    .downcast_ref::<Validation>()
                    .map_or_else(|| error.to_string(), |v| v.reason.clone());
                reporter.log_error(reason, ErrorKind::Validation, None);
            }
            Kind::Internal if error.downcast_ref::<serde_json::Error>().is_some() => {
                reporter.log_error(
                    format!("{ERROR_CONTEXT}: Invalid response from server"),
                    ErrorKind::Api,
                    Some(json!({ "error": error.to_string() })),
                );
            }
            _ => {
                reporter.report_network_error(error, ERROR_CONTEXT);
            }
        }
    }
}
