//! Integration tests for the full pipeline.
//!
//! Command → EventSource → EventLog → persist listener → PubSub → EventView
//!
//! Verifies:
//! - Views follow writes made through an event source
//! - Views started at different times converge
//! - Deletion events remove projected entities
//! - A view's projection equals a full fold of each entity's history

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use eventide_core::{DomainError, DomainResult, EventData, UuidKeyProvider};
use eventide_pubsub::InMemoryPubSub;

use crate::config::EngineConfig;
use crate::event_source::EventSource;
use crate::event_store::{EventLog, InMemoryEventStore};
use crate::event_view::{EventView, EventViewHolder, InMemoryViewStore};

type Log = EventLog<String, String, String>;
type Source = EventSource<String, String, String, String>;
type View = EventView<String, String, String>;

fn echo(commands: Vec<String>) -> DomainResult<Vec<String>> {
    Ok(commands)
}

fn concat(aggregate: Option<String>, event: &EventData<String>) -> DomainResult<String> {
    Ok(match aggregate {
        None => event.payload.clone(),
        Some(s) => format!("{s} {}", event.payload),
    })
}

/// View reducer: same fold as the aggregate, "delete" removes the entity.
fn summary(entity: Option<String>, event: &EventData<String>) -> DomainResult<Option<String>> {
    if event.payload == "delete" {
        return Ok(None);
    }
    concat(entity, event).map(Some)
}

struct Pipeline {
    log: Arc<Log>,
    bus: Arc<InMemoryPubSub>,
    source: Source,
}

impl Pipeline {
    fn new() -> Self {
        let log: Arc<Log> = Arc::new(EventLog::new(InMemoryEventStore::new()));
        let source = EventSource::new(UuidKeyProvider, echo, concat, Arc::clone(&log));
        Self {
            log,
            bus: Arc::new(InMemoryPubSub::new()),
            source,
        }
    }

    fn view(&self, name: &str, config: &EngineConfig) -> View {
        EventView::new(
            name,
            InMemoryViewStore::new(),
            summary,
            Arc::clone(&self.log),
            Arc::clone(&self.bus),
        )
        .with_config(config)
        .start()
        .unwrap()
    }

    fn execute(&self, pk: &str, commands: &[&str]) -> Option<String> {
        let commands = commands.iter().map(|c| c.to_string()).collect();
        self.source.execute(&pk.to_string(), commands).unwrap()
    }
}

fn sorted(view: &View) -> Vec<(String, String)> {
    let mut entities = view.entities().unwrap();
    entities.sort();
    entities
}

#[test]
fn views_follow_commands_executed_through_the_source() {
    let pipeline = Pipeline::new();
    let view = pipeline.view("summaries", &EngineConfig::default());

    let aggregate = pipeline.execute("x", &["a", "b"]);
    assert_eq!(aggregate.as_deref(), Some("a b"));
    assert_eq!(view.get(&"x".to_string()).unwrap().as_deref(), Some("a b"));

    pipeline.execute("x", &["c"]);
    assert_eq!(view.get(&"x".to_string()).unwrap().as_deref(), Some("a b c"));

    view.shutdown();
}

#[test]
fn views_started_at_different_times_converge() {
    let pipeline = Pipeline::new();
    let early = pipeline.view("early", &EngineConfig::default());

    pipeline.execute("x", &["a", "b"]);
    pipeline.execute("y", &["c"]);

    let late = pipeline.view(
        "late",
        &EngineConfig {
            page_size: 1,
            ..EngineConfig::default()
        },
    );
    pipeline.execute("x", &["d"]);

    assert_eq!(late.get(&"x".to_string()).unwrap().as_deref(), Some("a b d"));
    assert_eq!(sorted(&early), sorted(&late));
    assert_eq!(early.checkpoint().unwrap(), late.checkpoint().unwrap());

    early.shutdown();
    late.shutdown();
}

#[test]
fn late_view_catches_up_from_its_startup_notification() {
    let pipeline = Pipeline::new();
    pipeline.execute("x", &["a"]);
    pipeline.execute("y", &["b", "c"]);

    let view = pipeline.view("late", &EngineConfig::default());
    // Joins the startup thread, whose notification already ran the catch-up.
    view.shutdown();

    assert_eq!(
        sorted(&view),
        vec![
            ("x".to_string(), "a".to_string()),
            ("y".to_string(), "b c".to_string()),
        ]
    );
}

#[test]
fn deletion_event_removes_the_projection_but_not_the_log() {
    let pipeline = Pipeline::new();
    let view = pipeline.view("summaries", &EngineConfig::default());

    pipeline.execute("x", &["a"]);
    pipeline.execute("x", &["delete"]);

    assert_eq!(view.get(&"x".to_string()).unwrap(), None);
    assert_eq!(pipeline.source.get(&"x".to_string()).unwrap().as_deref(), Some("a delete"));

    view.shutdown();
}

#[test]
fn view_reducer_failure_does_not_fail_the_write() {
    let pipeline = Pipeline::new();
    let strict = EventView::new(
        "strict",
        InMemoryViewStore::new(),
        |_: Option<String>, _: &EventData<String>| -> DomainResult<Option<String>> {
            Err(DomainError::invariant("rejects everything"))
        },
        Arc::clone(&pipeline.log),
        Arc::clone(&pipeline.bus),
    )
    .start()
    .unwrap();

    assert_eq!(pipeline.execute("x", &["a"]).as_deref(), Some("a"));
    assert!(strict.entities().unwrap().is_empty());
    assert!(strict.checkpoint().unwrap().is_beginning());

    strict.shutdown();
}

#[test]
fn holder_serves_a_view_kept_fresh_by_the_bus() {
    let pipeline = Pipeline::new();
    let holder = EventViewHolder::new(Arc::new(pipeline.view("summaries", &EngineConfig::default())));

    pipeline.execute("x", &["a"]);
    assert_eq!(holder.get().get(&"x".to_string()).unwrap().as_deref(), Some("a"));

    holder.view().shutdown();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn view_converges_to_full_fold(
        writes in prop::collection::vec((0usize..4, "[a-c]{1,3}"), 1..24),
        page_size in 1usize..6,
    ) {
        let pipeline = Pipeline::new();
        let view = pipeline.view(
            "summaries",
            &EngineConfig { page_size, ..EngineConfig::default() },
        );

        let mut expected: BTreeMap<String, String> = BTreeMap::new();
        for (key, payload) in &writes {
            let pk = format!("k{key}");
            pipeline.execute(&pk, &[payload.as_str()]);
            expected
                .entry(pk)
                .and_modify(|s| *s = format!("{s} {payload}"))
                .or_insert_with(|| payload.clone());
        }
        view.shutdown();

        let expected: Vec<(String, String)> = expected.into_iter().collect();
        prop_assert_eq!(sorted(&view), expected);
    }
}
