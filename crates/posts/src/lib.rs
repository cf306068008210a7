//! Blog posts on top of the event-sourcing engine.
//!
//! Posts are event-sourced aggregates keyed by a random UUID string; the
//! per-author listing is served from the `post_summary_view` materialized view.

pub mod post;
pub mod service;
pub mod summary;

pub use post::{
    CreatePost, Post, PostCommand, PostCreated, PostEvent, UpdatePost, handle_commands, reduce_post,
};
pub use service::{POST_STORE, PostError, PostLog, PostService};
pub use summary::{POST_SUMMARY_VIEW, PostSummary, reduce_summary};
