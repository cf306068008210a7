use std::sync::Arc;

use eventide_core::{Cursor, DomainResult, EventData};

use super::ViewError;

/// Durable state of one materialized view: its checkpoint and projected entities.
///
/// `commit` must be atomic as observed by readers: either the upserts, the
/// deletes and the new checkpoint all become visible, or none do. A crash in
/// the middle of a catch-up page then simply re-runs that page.
///
/// The checkpoint never moves backwards; a commit with a lower checkpoint
/// than the stored one keeps the stored value.
pub trait ViewStore<Pk, E>: Send + Sync {
    /// Highest global cursor fully incorporated, or [`Cursor::BEGINNING`].
    fn checkpoint(&self) -> Result<Cursor, ViewError>;

    fn entity(&self, pk: &Pk) -> Result<Option<E>, ViewError>;

    /// Every projected entity, in no particular order.
    fn entities(&self) -> Result<Vec<(Pk, E)>, ViewError>;

    fn commit(
        &self,
        checkpoint: Cursor,
        upserts: Vec<(Pk, E)>,
        deletes: Vec<Pk>,
    ) -> Result<(), ViewError>;
}

impl<Pk, E, S> ViewStore<Pk, E> for Arc<S>
where
    S: ViewStore<Pk, E> + ?Sized,
{
    fn checkpoint(&self) -> Result<Cursor, ViewError> {
        (**self).checkpoint()
    }

    fn entity(&self, pk: &Pk) -> Result<Option<E>, ViewError> {
        (**self).entity(pk)
    }

    fn entities(&self) -> Result<Vec<(Pk, E)>, ViewError> {
        (**self).entities()
    }

    fn commit(
        &self,
        checkpoint: Cursor,
        upserts: Vec<(Pk, E)>,
        deletes: Vec<Pk>,
    ) -> Result<(), ViewError> {
        (**self).commit(checkpoint, upserts, deletes)
    }
}

/// Folds one event into a view's projected entity.
///
/// Returning `Ok(None)` removes the entity from the view (e.g. on a
/// "deleted" event); the event log itself is untouched.
pub trait ViewReducer<Ev, E>: Send + Sync {
    fn reduce(&self, entity: Option<E>, event: &EventData<Ev>) -> DomainResult<Option<E>>;
}

impl<Ev, E, F> ViewReducer<Ev, E> for F
where
    F: Fn(Option<E>, &EventData<Ev>) -> DomainResult<Option<E>> + Send + Sync,
{
    fn reduce(&self, entity: Option<E>, event: &EventData<Ev>) -> DomainResult<Option<E>> {
        self(entity, event)
    }
}
