//! Materialized views built by folding the global event feed.
//!
//! ```text
//! persist(pk, events)            startup thread
//!   ↓ persist listener             ↓
//! publish("sync")              publish("catch-up")
//!   ↓                              ↓
//!   └──────── topic / group = view name ────────┘
//!                      ↓
//!                 catch_up():
//!   checkpoint → page global feed → fold per entity → commit(page max cursor)
//! ```
//!
//! Notification content is not interpreted; every message triggers the same
//! catch-up pass. Passes are serialized per view instance, and each page is
//! committed atomically with its checkpoint, so a pass abandoned mid-way
//! re-runs from the last committed page.

mod holder;
mod in_memory;
mod postgres;
mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use eventide_core::{Cursor, DomainError, EntityKey, EventData};
use eventide_pubsub::{MessageHandler, PubSub, PubSubError};

use crate::config::{DEFAULT_NOTIFICATION_TOPIC, DEFAULT_PAGE_SIZE, EngineConfig};
use crate::event_store::{EventFeed, EventStoreError, KeyedEvent, PersistListener};
use crate::workers::WorkerHandle;

pub use holder::EventViewHolder;
pub use in_memory::InMemoryViewStore;
pub use postgres::PostgresViewStore;
pub use store::{ViewReducer, ViewStore};

/// Published by the persist listener after every write.
pub const SYNC_MESSAGE: &str = "sync";
/// Published once by a freshly started view.
pub const CATCH_UP_MESSAGE: &str = "catch-up";

#[derive(Debug, Error)]
pub enum ViewError {
    /// The view reducer rejected an event (deterministic; not retried).
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    PubSub(#[from] PubSubError),

    #[error("view store backend error: {0}")]
    Backend(String),

    #[error("view store serialization error: {0}")]
    Serialization(String),

    #[error("view lock poisoned")]
    LockPoisoned,
}

/// Lifecycle of one view instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ViewState {
    Uninitialized = 0,
    CatchingUp = 1,
    Idle = 2,
}

impl ViewState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::CatchingUp,
            2 => Self::Idle,
            _ => Self::Uninitialized,
        }
    }
}

/// What one catch-up pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatchUpStats {
    pub pages: usize,
    pub events: usize,
    /// Checkpoint after the pass.
    pub checkpoint: Cursor,
}

struct ViewCore<Pk, Ev, E> {
    name: String,
    topic: String,
    page_size: usize,
    store: Arc<dyn ViewStore<Pk, E>>,
    reducer: Arc<dyn ViewReducer<Ev, E>>,
    feed: Arc<dyn EventFeed<Pk, Ev>>,
    pubsub: Arc<dyn PubSub>,
    catch_up: Mutex<()>,
    running: AtomicBool,
    state: AtomicU8,
}

impl<Pk, Ev, E> ViewCore<Pk, Ev, E>
where
    Pk: EntityKey,
{
    fn state(&self) -> ViewState {
        ViewState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ViewState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn notify(&self, message: &str) -> Result<(), ViewError> {
        self.pubsub.publish(&self.topic, &self.name, message)?;
        Ok(())
    }

    fn catch_up(&self) -> Result<CatchUpStats, ViewError> {
        let _guard = self.catch_up.lock().map_err(|_| ViewError::LockPoisoned)?;
        self.set_state(ViewState::CatchingUp);
        let result = self.fold_pages();
        self.set_state(ViewState::Idle);
        result
    }

    fn fold_pages(&self) -> Result<CatchUpStats, ViewError> {
        let start = self.store.checkpoint()?;
        let mut stats = CatchUpStats {
            checkpoint: start,
            ..CatchUpStats::default()
        };

        for page in self.feed.get_all_events(start, self.page_size) {
            let page = page?;
            let Some(last) = page.last().map(|record| record.cursor) else {
                continue;
            };

            // Entities touched by this page, in first-seen order.
            let mut order: Vec<Pk> = Vec::new();
            let mut folded: HashMap<Pk, Option<E>> = HashMap::new();

            for record in &page {
                let KeyedEvent { pk, event } = &record.payload;
                let current = match folded.remove(pk) {
                    Some(entity) => entity,
                    None => {
                        order.push(pk.clone());
                        self.store.entity(pk)?
                    }
                };
                folded.insert(pk.clone(), self.reducer.reduce(current, event)?);
            }

            let mut upserts = Vec::new();
            let mut deletes = Vec::new();
            for pk in order {
                match folded.remove(&pk) {
                    Some(Some(entity)) => upserts.push((pk, entity)),
                    Some(None) => deletes.push(pk),
                    None => {}
                }
            }

            self.store.commit(last, upserts, deletes)?;

            stats.pages += 1;
            stats.events += page.len();
            stats.checkpoint = last;
        }

        Ok(stats)
    }
}

/// A materialized view over an event feed.
///
/// Build with [`EventView::new`], optionally apply [`with_config`](Self::with_config),
/// then [`start`](Self::start) to subscribe it to notifications.
///
/// ## Generic parameters
///
/// - `Pk`: entity key of the source log
/// - `Ev`: event type of the source log
/// - `E`: projected entity stored by the view
pub struct EventView<Pk, Ev, E> {
    core: Arc<ViewCore<Pk, Ev, E>>,
    startup: Mutex<Option<WorkerHandle>>,
}

impl<Pk, Ev, E> EventView<Pk, Ev, E>
where
    Pk: EntityKey,
    Ev: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Build an unsubscribed view; call [`start`](Self::start) to hook it to
    /// the notification topic and the feed's persist listener. Until then it
    /// only changes through explicit [`catch_up`](Self::catch_up) calls.
    ///
    /// `name` is the consumer group, so it must be unique per view type.
    pub fn new(
        name: impl Into<String>,
        store: impl ViewStore<Pk, E> + 'static,
        reducer: impl ViewReducer<Ev, E> + 'static,
        feed: impl EventFeed<Pk, Ev> + 'static,
        pubsub: impl PubSub + 'static,
    ) -> Self {
        Self {
            core: Arc::new(ViewCore {
                name: name.into(),
                topic: DEFAULT_NOTIFICATION_TOPIC.to_string(),
                page_size: DEFAULT_PAGE_SIZE,
                store: Arc::new(store),
                reducer: Arc::new(reducer),
                feed: Arc::new(feed),
                pubsub: Arc::new(pubsub),
                catch_up: Mutex::new(()),
                running: AtomicBool::new(false),
                state: AtomicU8::new(ViewState::Uninitialized as u8),
            }),
            startup: Mutex::new(None),
        }
    }

    /// Take the notification topic and page size from `config`.
    ///
    /// Has no effect once the view has been started.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.topic = config.notification_topic.clone();
            core.page_size = config.page_size.max(1);
        }
        self
    }

    /// Subscribe to notifications, hook the feed's persist listener, and
    /// publish the one-shot startup catch-up from a background thread.
    pub fn start(self) -> Result<Self, ViewError> {
        let core = &self.core;
        core.running.store(true, Ordering::SeqCst);

        let weak = Arc::downgrade(core);
        let handler: MessageHandler = Arc::new(move |message: &str| -> anyhow::Result<()> {
            let Some(core) = weak.upgrade() else {
                return Ok(());
            };
            if !core.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            let stats = core.catch_up()?;
            debug!(
                view = %core.name,
                notification = message,
                pages = stats.pages,
                events = stats.events,
                checkpoint = %stats.checkpoint,
                "catch-up finished"
            );
            Ok(())
        });
        core.pubsub.register_consumer(&core.topic, &core.name, handler)?;

        let weak = Arc::downgrade(core);
        let listener: PersistListener<Pk, Ev> =
            Arc::new(move |_pk: &Pk, _events: &[EventData<Ev>]| {
                let Some(core) = weak.upgrade() else {
                    return;
                };
                if !core.running.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(err) = core.notify(SYNC_MESSAGE) {
                    warn!(view = %core.name, error = %err, "failed to publish sync notification");
                }
            });
        core.feed.register_on_persist_listener(listener)?;

        let weak = Arc::downgrade(core);
        let handle = WorkerHandle::spawn_once(format!("{}-startup", core.name), move || {
            let Some(core) = weak.upgrade() else {
                return;
            };
            if let Err(err) = core.notify(CATCH_UP_MESSAGE) {
                warn!(view = %core.name, error = %err, "failed to publish startup catch-up");
            }
        })
        .map_err(|e| ViewError::Backend(format!("failed to spawn startup notifier: {e}")))?;

        *self.startup.lock().map_err(|_| ViewError::LockPoisoned)? = Some(handle);

        info!(view = %core.name, topic = %core.topic, "event view started");
        Ok(self)
    }

    /// Publish a notification and return the view.
    ///
    /// This is a nudge, not a wait: with an asynchronous bus the catch-up may
    /// still be running when this returns.
    pub fn sync(&self) -> Result<&Self, ViewError> {
        self.core.notify(SYNC_MESSAGE)?;
        Ok(self)
    }

    /// Run one catch-up pass on the calling thread.
    pub fn catch_up(&self) -> Result<CatchUpStats, ViewError> {
        self.core.catch_up()
    }

    pub fn get(&self, pk: &Pk) -> Result<Option<E>, ViewError> {
        self.core.store.entity(pk)
    }

    pub fn entities(&self) -> Result<Vec<(Pk, E)>, ViewError> {
        self.core.store.entities()
    }

    pub fn checkpoint(&self) -> Result<Cursor, ViewError> {
        self.core.store.checkpoint()
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> ViewState {
        self.core.state()
    }

    /// Join the startup thread, then stop reacting to notifications.
    ///
    /// The startup catch-up is delivered before the view stops. A pass already
    /// in progress finishes normally.
    pub fn shutdown(&self) {
        let handle = match self.startup.lock() {
            Ok(mut startup) => startup.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.shutdown();
        }
        self.core.running.store(false, Ordering::SeqCst);
        info!(view = %self.core.name, "event view stopped");
    }
}

impl<Pk, Ev, E> core::fmt::Debug for EventView<Pk, Ev, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventView")
            .field("name", &self.core.name)
            .field("topic", &self.core.topic)
            .field("page_size", &self.core.page_size)
            .finish()
    }
}
