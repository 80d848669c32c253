use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::Display;

/// Body of a reaction request.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReactionRequest {
    pub reaction_type: String,
}

impl ReactionRequest {
    #[must_use]
    pub fn new<S: Into<String>>(reaction_type: S) -> Self {
        Self {
            reaction_type: reaction_type.into(),
        }
    }

    /// The reaction used when liking a comment.
    #[must_use]
    pub fn like() -> Self {
        Self::new("like")
    }
}

/// A new comment, optionally replying to another one.
///
/// ```
/// use feed_notify::api::types::CommentRequest;
///
/// let reply = CommentRequest::builder()
///     .post_id(12)
///     .content("Concordo!")
///     .parent_id(3)
///     .build();
///
/// assert_eq!(
///     serde_json::to_value(&reply)?,
///     serde_json::json!({"content": "Concordo!", "post_id": 12, "parent_id": 3})
/// );
/// # Ok::<(), serde_json::Error>(())
/// ```
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Builder)]
pub struct CommentRequest {
    #[builder(into)]
    pub content: String,
    pub post_id: u64,
    /// Comment being replied to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
}

/// Where a post is shared to.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ShareType {
    /// Repost on the user's own timeline
    Timeline,
    /// Send in a direct message
    Message,
    /// Copy the link
    Copy,
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ShareRequest {
    pub share_type: ShareType,
}

impl ShareRequest {
    #[must_use]
    pub const fn new(share_type: ShareType) -> Self {
        Self { share_type }
    }
}

/// Result of toggling a bookmark.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BookmarkResponse {
    /// Whether the post is saved after the toggle
    pub bookmarked: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BookmarkResponse {
    /// Confirmation text shown after the toggle.
    #[must_use]
    pub fn message(&self) -> &'static str {
        if self.bookmarked {
            "Post salvo"
        } else {
            "Post removido dos salvos"
        }
    }
}

/// Error payload of the backend; `detail` is a string for most errors and a list for
/// request validation failures.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub(crate) detail: Option<Value>,
}

impl ErrorBody {
    pub(crate) fn message(self) -> Option<String> {
        match self.detail? {
            Value::String(detail) => Some(detail),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}
