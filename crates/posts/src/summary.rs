use serde::{Deserialize, Serialize};

use eventide_core::{DomainError, DomainResult, EventData, ensure};

use crate::post::PostEvent;

/// View name (consumer group and table prefix) of the post summaries.
pub const POST_SUMMARY_VIEW: &str = "post_summary_view";

/// Read model: one row per live post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: String,
    pub author_mail: String,
    pub title: String,
    pub update_time: i64,
    pub creation_time: i64,
}

/// Folds post events into summaries; a deleted post leaves the view.
pub fn reduce_summary(
    summary: Option<PostSummary>,
    event: &EventData<PostEvent>,
) -> DomainResult<Option<PostSummary>> {
    match &event.payload {
        PostEvent::PostCreated(created) => {
            ensure(summary.is_none(), || {
                format!("summary of post {} already exists", created.id)
            })?;
            Ok(Some(PostSummary {
                id: created.id.clone(),
                author_mail: created.author_mail.clone(),
                title: created.title.clone(),
                update_time: created.creation_time,
                creation_time: created.creation_time,
            }))
        }
        PostEvent::PostDeleted { .. } => Ok(None),
        update => {
            let Some(mut summary) = summary else {
                return Err(DomainError::invariant(format!(
                    "can't apply {} before post.created",
                    update.event_type()
                )));
            };
            if let PostEvent::PostTitleSet { title } = update {
                summary.title = title.clone();
            }
            summary.update_time = event.timestamp;
            Ok(Some(summary))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use eventide_core::handler::fold;
    use proptest::prelude::*;

    use super::*;
    use crate::post::{Post, PostCreated, reduce_post};

    fn created() -> EventData<PostEvent> {
        EventData::new(
            PostEvent::PostCreated(PostCreated {
                id: "p1".into(),
                author_mail: "ann@example.com".into(),
                title: "Hello".into(),
                content: "Body".into(),
                creation_time: 5,
            }),
            5,
        )
    }

    #[test]
    fn content_changes_only_touch_update_time() {
        let summary = reduce_summary(None, &created()).unwrap();
        let content = EventData::new(PostEvent::PostContentSet { content: "x".into() }, 9);
        let summary = reduce_summary(summary, &content).unwrap().unwrap();

        assert_eq!(summary.title, "Hello");
        assert_eq!(summary.update_time, 9);
    }

    #[test]
    fn deletion_removes_the_summary() {
        let summary = reduce_summary(None, &created()).unwrap();
        let deleted = EventData::new(PostEvent::PostDeleted { reason: None }, 9);
        assert_eq!(reduce_summary(summary, &deleted).unwrap(), None);
    }

    #[test]
    fn second_create_is_an_invariant_violation() {
        let summary = reduce_summary(None, &created()).unwrap();
        let err = reduce_summary(summary, &created()).unwrap_err();
        assert_eq!(err, DomainError::invariant("summary of post p1 already exists"));
    }

    #[test]
    fn update_without_summary_is_an_invariant_violation() {
        let title = EventData::new(PostEvent::PostTitleSet { title: "x".into() }, 1);
        assert!(matches!(
            reduce_summary(None, &title),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    /// Per-post histories that are structurally valid: create first, nothing after delete.
    fn histories(ops: &[(usize, u8)]) -> BTreeMap<String, Vec<EventData<PostEvent>>> {
        let mut histories: BTreeMap<String, Vec<EventData<PostEvent>>> = BTreeMap::new();
        for (time, (post, op)) in ops.iter().enumerate() {
            let id = format!("p{post}");
            let time = time as i64;
            let history = histories.entry(id.clone()).or_default();
            let payload = match history.last().map(|event| &event.payload) {
                None => PostEvent::PostCreated(PostCreated {
                    id,
                    author_mail: "ann@example.com".into(),
                    title: format!("title {time}"),
                    content: "Body".into(),
                    creation_time: time,
                }),
                Some(PostEvent::PostDeleted { .. }) => continue,
                Some(_) => match op % 3 {
                    0 => PostEvent::PostTitleSet {
                        title: format!("title {time}"),
                    },
                    1 => PostEvent::PostContentSet {
                        content: format!("body {time}"),
                    },
                    _ => PostEvent::PostDeleted { reason: None },
                },
            };
            history.push(EventData::new(payload, time));
        }
        histories
    }

    proptest! {
        #[test]
        fn summaries_mirror_live_posts(ops in prop::collection::vec((0usize..4, any::<u8>()), 1..40)) {
            let mut live = 0;
            let mut summaries = 0;

            for history in histories(&ops).values() {
                let post: Post = fold(&reduce_post, None, history).unwrap().unwrap();

                let mut summary = None;
                for event in history {
                    summary = reduce_summary(summary, event).unwrap();
                }

                if !post.deleted {
                    live += 1;
                }
                if let Some(summary) = summary {
                    summaries += 1;
                    prop_assert!(!post.deleted);
                    prop_assert_eq!(summary.title, post.title);
                    prop_assert_eq!(summary.update_time, post.update_time);
                    prop_assert_eq!(summary.creation_time, post.creation_time);
                }
            }

            prop_assert_eq!(summaries, live);
        }
    }
}
