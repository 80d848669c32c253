//! Post interaction example: reacts to, comments on, shares and bookmarks a post.
//!
//! Run with tracing enabled:
//! ```sh
//! FEED_TOKEN=... FEED_POST_ID=12 RUST_LOG=info,hyper_util=off,hyper=off,reqwest=off cargo run --example post_interactions --features api,tracing
//! ```

use feed_notify::api::Client;
use feed_notify::api::types::{CommentRequest, ShareType};
use feed_notify::report::ErrorReporter;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let token = std::env::var("FEED_TOKEN")?;
    let post_id: u64 = std::env::var("FEED_POST_ID")?.parse()?;

    let reporter = ErrorReporter::new();
    let client = match std::env::var("FEED_API_HOST") {
        Ok(host) => Client::new(&host, token)?,
        Err(_) => Client::with_token(token)?,
    }
    .with_reporter(reporter.clone());

    match client.toggle_post_reaction(post_id, "love").await {
        Ok(response) => info!(endpoint = "toggle_post_reaction", %response),
        Err(e) => debug!(endpoint = "toggle_post_reaction", error = %e),
    }

    match client.user_reaction(post_id).await {
        Ok(reaction) => info!(endpoint = "user_reaction", reaction = ?reaction),
        Err(e) => debug!(endpoint = "user_reaction", error = %e),
    }

    let comment = CommentRequest::builder()
        .post_id(post_id)
        .content("Muito bom!")
        .build();
    match client.add_comment(&comment).await {
        Ok(response) => info!(endpoint = "add_comment", %response),
        Err(e) => debug!(endpoint = "add_comment", error = %e),
    }

    match client.post_comments(post_id).await {
        Ok(comments) => info!(endpoint = "post_comments", count = comments.len()),
        Err(e) => debug!(endpoint = "post_comments", error = %e),
    }

    match client.share_post(post_id, ShareType::Copy).await {
        Ok(response) => info!(endpoint = "share_post", %response),
        Err(e) => debug!(endpoint = "share_post", error = %e),
    }

    match client.toggle_bookmark(post_id).await {
        Ok(response) => info!(endpoint = "toggle_bookmark", message = response.message()),
        Err(e) => debug!(endpoint = "toggle_bookmark", error = %e),
    }

    for error in reporter.recent_errors(10) {
        info!(kind = %error.kind(), message = error.user_friendly_message(), "reported");
    }

    Ok(())
}
