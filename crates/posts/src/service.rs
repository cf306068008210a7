//! Application service: writes through the post event source, lists through
//! the summary view.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use eventide_core::{DomainError, UuidKeyProvider};
use eventide_infra::{
    EngineConfig, EventLog, EventSource, EventSourceError, EventStoreError, EventView,
    EventViewHolder, InMemoryEventStore, InMemoryViewStore, PgClient, PostgresEventStore,
    PostgresViewStore, ViewError, ViewStore,
};
use eventide_pubsub::{InMemoryPubSub, PubSub};

use crate::post::{CreatePost, Post, PostCommand, PostEvent, UpdatePost, handle_commands, reduce_post};
use crate::summary::{POST_SUMMARY_VIEW, PostSummary, reduce_summary};

/// Store name of the post event log (tables `post_events` / `post_snapshots`).
pub const POST_STORE: &str = "post";

#[derive(Debug, Error)]
pub enum PostError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Source(#[from] EventSourceError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    View(#[from] ViewError),
}

pub type PostLog = EventLog<String, PostEvent, Post>;

pub struct PostService {
    posts: EventSource<String, PostCommand, PostEvent, Post>,
    summaries: EventViewHolder<String, PostEvent, PostSummary>,
}

impl PostService {
    /// Wire the service over an event log, a summary view store and a bus.
    pub fn new(
        log: Arc<PostLog>,
        summary_store: impl ViewStore<String, PostSummary> + 'static,
        pubsub: impl PubSub + 'static,
        config: &EngineConfig,
    ) -> Result<Self, PostError> {
        let view = EventView::new(
            POST_SUMMARY_VIEW,
            summary_store,
            reduce_summary,
            Arc::clone(&log),
            pubsub,
        )
        .with_config(config)
        .start()?;

        let posts = EventSource::new(UuidKeyProvider, handle_commands, reduce_post, log)
            .with_config(config);

        Ok(Self {
            posts,
            summaries: EventViewHolder::new(Arc::new(view)),
        })
    }

    /// Everything in memory, one in-process bus.
    pub fn in_memory(config: &EngineConfig) -> Result<Self, PostError> {
        Self::new(
            Arc::new(EventLog::new(InMemoryEventStore::new())),
            InMemoryViewStore::new(),
            InMemoryPubSub::new(),
            config,
        )
    }

    /// Postgres-backed log and summaries; creates missing tables.
    pub fn postgres(
        client: PgClient,
        pubsub: impl PubSub + 'static,
        config: &EngineConfig,
    ) -> Result<Self, PostError> {
        let store = PostgresEventStore::new(client.clone(), POST_STORE)?;
        store.ensure_schema()?;
        let summaries = PostgresViewStore::new(client, POST_SUMMARY_VIEW)?;
        summaries.ensure_schema()?;

        Self::new(Arc::new(EventLog::new(store)), summaries, pubsub, config)
    }

    pub fn post(&self, author_mail: &str, title: &str, content: &str) -> Result<Post, PostError> {
        let id = self.posts.generate_new_key();
        let command = PostCommand::CreatePost(CreatePost {
            id: id.clone(),
            author_mail: author_mail.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            creation_time: Utc::now().timestamp_millis(),
        });

        let post = self
            .posts
            .execute(&id, vec![command])?
            .ok_or_else(DomainError::not_found)?;
        info!(post_id = %post.id, "post created");
        Ok(post)
    }

    /// `None` when the post does not exist, belongs to someone else, or is deleted.
    pub fn update_post(
        &self,
        post_id: &str,
        author_mail: &str,
        title: &str,
        content: &str,
    ) -> Result<Option<Post>, PostError> {
        if self.get_post(post_id, author_mail)?.is_none() {
            return Ok(None);
        }

        let command = PostCommand::UpdatePost(UpdatePost {
            title: title.to_string(),
            content: content.to_string(),
        });
        Ok(self.posts.execute(&post_id.to_string(), vec![command])?)
    }

    pub fn get_post(&self, post_id: &str, author_mail: &str) -> Result<Option<Post>, PostError> {
        Ok(self.posts.get_filtered(&post_id.to_string(), |post| {
            post.author_mail == author_mail && !post.deleted
        })?)
    }

    /// Whether a visible post was deleted.
    pub fn delete_post(
        &self,
        post_id: &str,
        author_mail: &str,
        reason: Option<&str>,
    ) -> Result<bool, PostError> {
        if self.get_post(post_id, author_mail)?.is_none() {
            return Ok(false);
        }

        let command = PostCommand::DeletePost {
            reason: reason.map(str::to_string),
        };
        self.posts.execute(&post_id.to_string(), vec![command])?;
        info!(post_id = %post_id, "post deleted");
        Ok(true)
    }

    /// Live posts of `author_mail`, newest first.
    pub fn post_summaries(&self, author_mail: &str) -> Result<Vec<PostSummary>, PostError> {
        let mut summaries: Vec<PostSummary> = self
            .summaries
            .get()
            .entities()?
            .into_iter()
            .map(|(_, summary)| summary)
            .filter(|summary| summary.author_mail == author_mail)
            .collect();

        summaries.sort_by(|a, b| {
            b.creation_time
                .cmp(&a.creation_time)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(summaries)
    }

    /// Stop the summary view's notification processing.
    pub fn shutdown(&self) {
        self.summaries.view().shutdown();
    }
}
