use std::collections::HashMap;
use std::sync::RwLock;

use eventide_core::{Cursor, EntityKey};

use super::ViewError;
use super::store::ViewStore;

struct ViewState<Pk, E> {
    checkpoint: Cursor,
    entities: HashMap<Pk, E>,
}

/// In-memory view store.
///
/// Intended for tests/dev. One lock covers the entities and the checkpoint,
/// which makes `commit` atomic.
pub struct InMemoryViewStore<Pk, E> {
    state: RwLock<ViewState<Pk, E>>,
}

impl<Pk, E> InMemoryViewStore<Pk, E> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<Pk, E> Default for InMemoryViewStore<Pk, E> {
    fn default() -> Self {
        Self {
            state: RwLock::new(ViewState {
                checkpoint: Cursor::BEGINNING,
                entities: HashMap::new(),
            }),
        }
    }
}

impl<Pk, E> core::fmt::Debug for InMemoryViewStore<Pk, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (checkpoint, entities) = self
            .state
            .read()
            .map(|s| (s.checkpoint, s.entities.len()))
            .unwrap_or((Cursor::BEGINNING, 0));
        f.debug_struct("InMemoryViewStore")
            .field("checkpoint", &checkpoint)
            .field("entities", &entities)
            .finish()
    }
}

impl<Pk, E> ViewStore<Pk, E> for InMemoryViewStore<Pk, E>
where
    Pk: EntityKey,
    E: Clone + Send + Sync,
{
    fn checkpoint(&self) -> Result<Cursor, ViewError> {
        let state = self.state.read().map_err(|_| ViewError::LockPoisoned)?;
        Ok(state.checkpoint)
    }

    fn entity(&self, pk: &Pk) -> Result<Option<E>, ViewError> {
        let state = self.state.read().map_err(|_| ViewError::LockPoisoned)?;
        Ok(state.entities.get(pk).cloned())
    }

    fn entities(&self) -> Result<Vec<(Pk, E)>, ViewError> {
        let state = self.state.read().map_err(|_| ViewError::LockPoisoned)?;
        Ok(state
            .entities
            .iter()
            .map(|(pk, e)| (pk.clone(), e.clone()))
            .collect())
    }

    fn commit(
        &self,
        checkpoint: Cursor,
        upserts: Vec<(Pk, E)>,
        deletes: Vec<Pk>,
    ) -> Result<(), ViewError> {
        let mut state = self.state.write().map_err(|_| ViewError::LockPoisoned)?;
        for (pk, entity) in upserts {
            state.entities.insert(pk, entity);
        }
        for pk in &deletes {
            state.entities.remove(pk);
        }
        state.checkpoint = state.checkpoint.max(checkpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_before_all_cursors_and_empty() {
        let store: InMemoryViewStore<String, u32> = InMemoryViewStore::new();
        assert_eq!(store.checkpoint().unwrap(), Cursor::BEGINNING);
        assert!(store.entities().unwrap().is_empty());
    }

    #[test]
    fn commit_applies_upserts_deletes_and_checkpoint_together() {
        let store: InMemoryViewStore<String, u32> = InMemoryViewStore::new();
        store
            .commit(
                Cursor::new(2),
                vec![("a".into(), 1), ("b".into(), 2)],
                vec![],
            )
            .unwrap();
        store
            .commit(Cursor::new(4), vec![("a".into(), 10)], vec!["b".into()])
            .unwrap();

        assert_eq!(store.checkpoint().unwrap(), Cursor::new(4));
        assert_eq!(store.entity(&"a".to_string()).unwrap(), Some(10));
        assert_eq!(store.entity(&"b".to_string()).unwrap(), None);
    }

    #[test]
    fn checkpoint_never_moves_backwards() {
        let store: InMemoryViewStore<String, u32> = InMemoryViewStore::new();
        store.commit(Cursor::new(9), vec![], vec![]).unwrap();
        store.commit(Cursor::new(3), vec![], vec![]).unwrap();
        assert_eq!(store.checkpoint().unwrap(), Cursor::new(9));
    }
}
