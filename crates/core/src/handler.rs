//! Application-supplied decision and evolution logic.
//!
//! Both traits are pure: no IO, no side effects. The orchestrator owns
//! persistence, timestamps and snapshotting.

use crate::data::EventData;
use crate::error::DomainResult;

/// Turns a batch of commands (intent) into the events (facts) they produce.
///
/// Commands are rejected with [`DomainError::Validation`](crate::DomainError::Validation)
/// when invalid. An empty event list means "nothing happened".
pub trait CommandHandler<Cmd, Ev>: Send + Sync {
    fn execute(&self, commands: Vec<Cmd>) -> DomainResult<Vec<Ev>>;
}

impl<Cmd, Ev, F> CommandHandler<Cmd, Ev> for F
where
    F: Fn(Vec<Cmd>) -> DomainResult<Vec<Ev>> + Send + Sync,
{
    fn execute(&self, commands: Vec<Cmd>) -> DomainResult<Vec<Ev>> {
        self(commands)
    }
}

/// Folds one event into an aggregate.
///
/// `aggregate` is `None` before the first event of a stream. Implementations
/// must fail loudly with an invariant violation on structurally impossible
/// sequences (e.g. a "created" event applied to an existing aggregate) instead
/// of silently producing a state.
pub trait EventReducer<Ev, Agg>: Send + Sync {
    fn reduce(&self, aggregate: Option<Agg>, event: &EventData<Ev>) -> DomainResult<Agg>;
}

impl<Ev, Agg, F> EventReducer<Ev, Agg> for F
where
    F: Fn(Option<Agg>, &EventData<Ev>) -> DomainResult<Agg> + Send + Sync,
{
    fn reduce(&self, aggregate: Option<Agg>, event: &EventData<Ev>) -> DomainResult<Agg> {
        self(aggregate, event)
    }
}

/// Fold `events` in order, starting from `initial`.
pub fn fold<'a, Ev, Agg, R>(
    reducer: &R,
    initial: Option<Agg>,
    events: impl IntoIterator<Item = &'a EventData<Ev>>,
) -> DomainResult<Option<Agg>>
where
    Ev: 'a,
    R: EventReducer<Ev, Agg> + ?Sized,
{
    let mut aggregate = initial;
    for event in events {
        aggregate = Some(reducer.reduce(aggregate, event)?);
    }
    Ok(aggregate)
}
