use serde::{Deserialize, Serialize};

use eventide_core::{DomainError, DomainResult, EventData, ensure};

/// Aggregate: Post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_mail: String,
    pub title: String,
    pub content: String,
    /// Millis of the last applied event.
    pub update_time: i64,
    pub creation_time: i64,
    pub deleted: bool,
}

/// Command: CreatePost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePost {
    pub id: String,
    pub author_mail: String,
    pub title: String,
    pub content: String,
    pub creation_time: i64,
}

/// Command: UpdatePost (title and content together).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePost {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostCommand {
    CreatePost(CreatePost),
    UpdatePost(UpdatePost),
    SetPostTitle { title: String },
    SetPostContent { content: String },
    DeletePost { reason: Option<String> },
}

/// Event: PostCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCreated {
    pub id: String,
    pub author_mail: String,
    pub title: String,
    pub content: String,
    pub creation_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostEvent {
    PostCreated(PostCreated),
    PostTitleSet { title: String },
    PostContentSet { content: String },
    PostDeleted { reason: Option<String> },
}

impl PostEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PostEvent::PostCreated(_) => "post.created",
            PostEvent::PostTitleSet { .. } => "post.title_set",
            PostEvent::PostContentSet { .. } => "post.content_set",
            PostEvent::PostDeleted { .. } => "post.deleted",
        }
    }
}

/// Turns post commands into events. Pure; state checks happen in the reducer.
pub fn handle_commands(commands: Vec<PostCommand>) -> DomainResult<Vec<PostEvent>> {
    let mut events = Vec::with_capacity(commands.len());
    for command in commands {
        match command {
            PostCommand::CreatePost(cmd) => {
                if cmd.title.trim().is_empty() {
                    return Err(DomainError::validation("title cannot be empty"));
                }
                events.push(PostEvent::PostCreated(PostCreated {
                    id: cmd.id,
                    author_mail: cmd.author_mail,
                    title: cmd.title,
                    content: cmd.content,
                    creation_time: cmd.creation_time,
                }));
            }
            PostCommand::UpdatePost(cmd) => {
                if cmd.title.trim().is_empty() {
                    return Err(DomainError::validation("title cannot be empty"));
                }
                events.push(PostEvent::PostTitleSet { title: cmd.title });
                events.push(PostEvent::PostContentSet {
                    content: cmd.content,
                });
            }
            PostCommand::SetPostTitle { title } => {
                if title.trim().is_empty() {
                    return Err(DomainError::validation("title cannot be empty"));
                }
                events.push(PostEvent::PostTitleSet { title });
            }
            PostCommand::SetPostContent { content } => {
                events.push(PostEvent::PostContentSet { content });
            }
            PostCommand::DeletePost { reason } => events.push(PostEvent::PostDeleted { reason }),
        }
    }
    Ok(events)
}

/// Folds post events into the [`Post`] aggregate.
///
/// Structural violations (a second create, an update before create or after
/// delete) are invariant errors, never silently ignored.
pub fn reduce_post(post: Option<Post>, event: &EventData<PostEvent>) -> DomainResult<Post> {
    match (&event.payload, post) {
        (PostEvent::PostCreated(created), post) => {
            ensure(post.is_none(), || format!("post {} was already created", created.id))?;
            Ok(Post {
                id: created.id.clone(),
                author_mail: created.author_mail.clone(),
                title: created.title.clone(),
                content: created.content.clone(),
                update_time: created.creation_time,
                creation_time: created.creation_time,
                deleted: false,
            })
        }
        (update, None) => Err(DomainError::invariant(format!(
            "can't apply {} before post.created",
            update.event_type()
        ))),
        (update, Some(mut post)) => {
            ensure(!post.deleted, || format!("post {} is already deleted", post.id))?;

            match update {
                PostEvent::PostTitleSet { title } => post.title = title.clone(),
                PostEvent::PostContentSet { content } => post.content = content.clone(),
                PostEvent::PostDeleted { .. } => post.deleted = true,
                PostEvent::PostCreated(_) => {}
            }
            post.update_time = event.timestamp;
            Ok(post)
        }
    }
}

#[cfg(test)]
mod tests {
    use eventide_core::handler::fold;

    use super::*;

    fn created(id: &str) -> PostEvent {
        PostEvent::PostCreated(PostCreated {
            id: id.to_string(),
            author_mail: "ann@example.com".to_string(),
            title: "Hello".to_string(),
            content: "First post".to_string(),
            creation_time: 10,
        })
    }

    fn at(payload: PostEvent, timestamp: i64) -> EventData<PostEvent> {
        EventData::new(payload, timestamp)
    }

    #[test]
    fn update_post_expands_to_title_and_content_events() {
        let events = handle_commands(vec![PostCommand::UpdatePost(UpdatePost {
            title: "New".into(),
            content: "Body".into(),
        })])
        .unwrap();

        assert_eq!(
            events,
            vec![
                PostEvent::PostTitleSet { title: "New".into() },
                PostEvent::PostContentSet {
                    content: "Body".into()
                },
            ]
        );
    }

    #[test]
    fn blank_titles_are_rejected() {
        let err = handle_commands(vec![PostCommand::SetPostTitle { title: "  ".into() }]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn fold_tracks_updates_and_update_time() {
        let history = [
            at(created("p1"), 10),
            at(PostEvent::PostTitleSet { title: "Edited".into() }, 20),
            at(PostEvent::PostContentSet { content: "More".into() }, 30),
        ];

        let post = fold(&reduce_post, None, &history).unwrap().unwrap();
        assert_eq!(post.title, "Edited");
        assert_eq!(post.content, "More");
        assert_eq!(post.creation_time, 10);
        assert_eq!(post.update_time, 30);
        assert!(!post.deleted);
    }

    #[test]
    fn structural_violations_fail_loudly() {
        let created_twice = [at(created("p1"), 1), at(created("p1"), 2)];
        assert!(matches!(
            fold(&reduce_post, None, &created_twice),
            Err(DomainError::InvariantViolation(_))
        ));

        let update_first = [at(PostEvent::PostTitleSet { title: "x".into() }, 1)];
        assert!(matches!(
            fold(&reduce_post, None, &update_first),
            Err(DomainError::InvariantViolation(_))
        ));

        let after_delete = [
            at(created("p1"), 1),
            at(PostEvent::PostDeleted { reason: None }, 2),
            at(PostEvent::PostContentSet { content: "x".into() }, 3),
        ];
        assert!(matches!(
            fold(&reduce_post, None, &after_delete),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn events_serialize_for_durable_stores() {
        let json = serde_json::to_string(&PostEvent::PostDeleted {
            reason: Some("spam".into()),
        })
        .unwrap();
        let back: PostEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "post.deleted");
    }
}
