use std::sync::Arc;

use tracing::warn;

use eventide_core::EntityKey;

use super::EventView;

/// Read-path handle that nudges its view toward freshness before each use.
#[derive(Debug)]
pub struct EventViewHolder<Pk, Ev, E> {
    view: Arc<EventView<Pk, Ev, E>>,
}

impl<Pk, Ev, E> Clone for EventViewHolder<Pk, Ev, E> {
    fn clone(&self) -> Self {
        Self {
            view: Arc::clone(&self.view),
        }
    }
}

impl<Pk, Ev, E> EventViewHolder<Pk, Ev, E>
where
    Pk: EntityKey,
    Ev: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new(view: Arc<EventView<Pk, Ev, E>>) -> Self {
        Self { view }
    }

    /// Publish a sync notification and return the view.
    ///
    /// A failed publish is logged; the view is returned either way and serves
    /// whatever it has already projected.
    pub fn get(&self) -> &EventView<Pk, Ev, E> {
        if let Err(err) = self.view.sync() {
            warn!(view = %self.view.name(), error = %err, "view sync failed; serving current projection");
        }
        &self.view
    }

    /// The view without a sync nudge.
    pub fn view(&self) -> &Arc<EventView<Pk, Ev, E>> {
        &self.view
    }
}

#[cfg(test)]
mod tests {
    use eventide_core::{DomainResult, EventData};
    use eventide_pubsub::{InMemoryPubSub, MessageHandler, PubSub, PubSubError};

    use super::*;
    use crate::event_store::{EventLog, InMemoryEventStore};
    use crate::event_view::InMemoryViewStore;

    fn count(entity: Option<u32>, _event: &EventData<String>) -> DomainResult<Option<u32>> {
        Ok(Some(entity.unwrap_or(0) + 1))
    }

    #[test]
    fn get_catches_up_before_returning_the_view() {
        let log: Arc<EventLog<String, String, ()>> = Arc::new(EventLog::new(InMemoryEventStore::new()));
        let bus = Arc::new(InMemoryPubSub::new());
        log.persist(&"x".to_string(), &[EventData::new("a".to_string(), 0)])
            .unwrap();

        // Registered as a consumer but never started, so only `get` triggers catch-up.
        let view = Arc::new(EventView::new(
            "counts",
            InMemoryViewStore::new(),
            count,
            Arc::clone(&log),
            Arc::clone(&bus),
        ));
        let core = Arc::downgrade(&view);
        let handler: MessageHandler = Arc::new(move |_: &str| -> anyhow::Result<()> {
            if let Some(view) = core.upgrade() {
                view.catch_up()?;
            }
            Ok(())
        });
        bus.register_consumer("event-view", "counts", handler).unwrap();

        let holder = EventViewHolder::new(view);
        assert_eq!(holder.view().get(&"x".to_string()).unwrap(), None);
        assert_eq!(holder.get().get(&"x".to_string()).unwrap(), Some(1));
    }

    struct DownBus;

    impl PubSub for DownBus {
        fn publish(&self, _: &str, _: &str, _: &str) -> Result<(), PubSubError> {
            Err(PubSubError::Backend("bus unavailable".into()))
        }

        fn register_consumer(&self, _: &str, _: &str, _: MessageHandler) -> Result<(), PubSubError> {
            Ok(())
        }
    }

    #[test]
    fn publish_failure_still_returns_the_view() {
        let log: Arc<EventLog<String, String, ()>> = Arc::new(EventLog::new(InMemoryEventStore::new()));
        let view = EventView::new("counts", InMemoryViewStore::new(), count, Arc::clone(&log), DownBus);
        view.catch_up().unwrap();

        let holder = EventViewHolder::new(Arc::new(view));
        assert_eq!(holder.get().name(), "counts");
        assert!(holder.get().entities().unwrap().is_empty());
    }
}
