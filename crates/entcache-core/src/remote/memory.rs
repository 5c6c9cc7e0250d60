use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{RemoteError, RemoteService};
use crate::reader::{Entity, EntityDescriptor};

/// A remote call recorded by [`InMemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall<K> {
    Put(K),
    Delete(K),
    GetAll,
}

struct State<E: Entity> {
    entities: HashMap<E::Key, E>,
    calls: Vec<RemoteCall<E::Key>>,
    fail_on: HashSet<E::Key>,
}

/// An in-memory remote service.
///
/// Puts are upserts, deletes of absent keys fail with `NotFound`, and
/// every call is recorded. Keys registered with [`fail_on`](Self::fail_on)
/// are rejected until [`recover`](Self::recover) is called.
pub struct InMemoryRemote<E: Entity> {
    descriptor: EntityDescriptor<E>,
    state: Mutex<State<E>>,
}

impl<E: Entity> InMemoryRemote<E> {
    pub fn new() -> crate::Result<Self> {
        Ok(Self {
            descriptor: E::descriptor().build()?,
            state: Mutex::new(State {
                entities: HashMap::new(),
                calls: Vec::new(),
                fail_on: HashSet::new(),
            }),
        })
    }

    /// Seed the remote store.
    pub fn with_entities(self, entities: impl IntoIterator<Item = E>) -> crate::Result<Self> {
        {
            let mut state = self.lock();
            for entity in entities {
                let key = self.descriptor.key_of(&entity)?;
                state.entities.insert(key, entity);
            }
        }
        Ok(self)
    }

    /// Reject every call that touches `key`.
    pub fn fail_on(&self, key: E::Key) {
        self.lock().fail_on.insert(key);
    }

    pub fn recover(&self) {
        self.lock().fail_on.clear();
    }

    pub fn calls(&self) -> Vec<RemoteCall<E::Key>> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn get(&self, key: &E::Key) -> Option<E> {
        self.lock().entities.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<E>> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: Entity> RemoteService<E> for InMemoryRemote<E> {
    async fn put_entity(&self, entity: &E) -> Result<(), RemoteError> {
        let key = self
            .descriptor
            .key_of(entity)
            .map_err(|e| RemoteError::Rejected(e.to_string()))?;
        let mut state = self.lock();
        state.calls.push(RemoteCall::Put(key.clone()));
        if state.fail_on.contains(&key) {
            return Err(RemoteError::Rejected(format!("put of {} refused", key)));
        }
        state.entities.insert(key, entity.clone());
        Ok(())
    }

    async fn delete_by_id(&self, key: &E::Key) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Delete(key.clone()));
        if state.fail_on.contains(key) {
            return Err(RemoteError::Rejected(format!("delete of {} refused", key)));
        }
        match state.entities.remove(key) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(format!("{} {}", E::NAME, key))),
        }
    }

    async fn get_all_entities(&self) -> Result<Vec<E>, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::GetAll);
        Ok(state.entities.values().cloned().collect())
    }
}
