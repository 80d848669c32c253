//! Client for the post interaction endpoints of the feed backend.
//!
//! **Feature flag:** `api` (required to use this module)
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `POST /posts/{id}/reactions` | React to a post (toggles) |
//! | `DELETE /posts/{id}/reactions` | Remove the user's reaction |
//! | `GET /posts/{id}/user-reaction` | The user's current reaction |
//! | `POST /comments/` | Add a comment or reply |
//! | `GET /posts/{id}/comments` | Comments of a post |
//! | `POST /comments/{id}/reactions` | Like a comment |
//! | `POST /posts/{id}/share` | Share to timeline, message or clipboard |
//! | `POST /posts/{id}/bookmark` | Save or unsave a post |
//!
//! Response bodies are kept as [`serde_json::Value`]; only the fields this crate acts on
//! are typed.

pub mod client;
pub mod types;

pub use client::Client;
