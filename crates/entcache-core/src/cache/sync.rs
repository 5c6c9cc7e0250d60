//! Transaction queue: pushes a cache's pending changes to a remote service.
//!
//! The dirty sets are drained in a fixed order: deletes, then adds, then
//! updates. Each sub-batch is snapshotted into a work queue and processed
//! one entity at a time. An entity leaves its dirty set only after the
//! remote call for it succeeded, so a failure or cancellation leaves the
//! failed entity and everything after it pending for the next run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::store::EntityCache;
use crate::codec::SnapshotCodec;
use crate::error::{CacheError, Result};
use crate::reader::Entity;
use crate::remote::{RemoteError, RemoteService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Add,
    Update,
    Delete,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Add => write!(f, "Add"),
            TransactionKind::Update => write!(f, "Update"),
            TransactionKind::Delete => write!(f, "Delete"),
        }
    }
}

/// Progress notification, emitted once per synchronized entity.
#[derive(Debug)]
pub struct TransactionEvent<'a, E> {
    pub kind: TransactionKind,
    /// Size of the sub-batch being drained.
    pub total: usize,
    /// 1-based position of this entity in the sub-batch.
    pub sequence: usize,
    pub entity: &'a E,
}

/// Cooperative cancellation for a running synchronization.
/// Checked once per entity, before its remote call.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Number of remote operations a synchronization performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub deleted: usize,
    pub added: usize,
    pub updated: usize,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.deleted + self.added + self.updated
    }
}

type ProgressFn<'a, E> = Box<dyn FnMut(&TransactionEvent<'_, E>) + Send + 'a>;

pub struct TransactionQueue<'a, E: Entity, R: RemoteService<E>> {
    remote: &'a R,
    progress: Option<ProgressFn<'a, E>>,
    cancel: Option<CancelHandle>,
}

impl<'a, E: Entity, R: RemoteService<E>> TransactionQueue<'a, E, R> {
    pub fn new(remote: &'a R) -> Self {
        Self {
            remote,
            progress: None,
            cancel: None,
        }
    }

    /// Receive a [`TransactionEvent`] after each successful remote call.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&TransactionEvent<'_, E>) + Send + 'a,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Drain every dirty set of `cache` against the remote service.
    pub async fn run<C: SnapshotCodec>(mut self, cache: &mut EntityCache<E, C>) -> Result<SyncReport> {
        let pending = cache.pending_counts();
        info!(
            cache = %cache.name,
            deleted = pending.deleted,
            added = pending.added,
            updated = pending.updated,
            "Saving pending changes to server"
        );

        let report = SyncReport {
            deleted: self.drain(cache, TransactionKind::Delete).await?,
            added: self.drain(cache, TransactionKind::Add).await?,
            updated: self.drain(cache, TransactionKind::Update).await?,
        };

        info!(cache = %cache.name, sent = report.total(), "Pending changes saved");
        Ok(report)
    }

    async fn drain<C: SnapshotCodec>(
        &mut self,
        cache: &mut EntityCache<E, C>,
        kind: TransactionKind,
    ) -> Result<usize> {
        let queue: Vec<E::Key> = match kind {
            TransactionKind::Delete => cache.deleted.keys().cloned().collect(),
            TransactionKind::Add => cache.added.iter().cloned().collect(),
            TransactionKind::Update => cache.updated.iter().cloned().collect(),
        };
        let total = queue.len();

        for (i, key) in queue.into_iter().enumerate() {
            if self.cancel.as_ref().is_some_and(CancelHandle::is_cancelled) {
                warn!(cache = %cache.name, %kind, done = i, total, "Synchronization cancelled");
                return Err(CacheError::Cancelled);
            }

            let sent = match kind {
                TransactionKind::Delete => self.remote.delete_by_id(&key).await,
                TransactionKind::Add | TransactionKind::Update => {
                    let entity = cache.get(&key)?;
                    self.remote.put_entity(entity).await
                }
            };
            if let Err(source) = sent {
                warn!(cache = %cache.name, %kind, key = %key, error = %source, "Remote operation failed");
                return Err(remote_failure(kind, &key, source));
            }

            let deleted = match kind {
                TransactionKind::Delete => cache.deleted.remove(&key),
                TransactionKind::Add => {
                    cache.added.remove(&key);
                    None
                }
                TransactionKind::Update => {
                    cache.updated.remove(&key);
                    None
                }
            };
            debug!(cache = %cache.name, %kind, key = %key, sequence = i + 1, total, "Transaction completed");

            if let Some(progress) = self.progress.as_mut() {
                let entity = match deleted {
                    Some(ref entity) => entity,
                    None => cache.get(&key)?,
                };
                progress(&TransactionEvent {
                    kind,
                    total,
                    sequence: i + 1,
                    entity,
                });
            }
        }

        let remaining = match kind {
            TransactionKind::Delete => cache.deleted.len(),
            TransactionKind::Add => cache.added.len(),
            TransactionKind::Update => cache.updated.len(),
        };
        debug_assert_eq!(remaining, 0, "{} sub-batch not fully drained", kind);
        Ok(total)
    }
}

fn remote_failure<K: fmt::Display>(kind: TransactionKind, key: &K, source: RemoteError) -> CacheError {
    CacheError::Remote {
        kind,
        key: key.to_string(),
        source,
    }
}

impl<E: Entity, C: SnapshotCodec> EntityCache<E, C> {
    /// Push every pending change to `remote`. See [`TransactionQueue`] for
    /// progress callbacks and cancellation.
    pub async fn save_to_server<R: RemoteService<E>>(&mut self, remote: &R) -> Result<SyncReport> {
        TransactionQueue::new(remote).run(self).await
    }

    /// Replace the entity set with everything the remote service holds.
    /// Refused with `PendingChanges` while local changes are unsaved.
    pub async fn refresh_from_server<R: RemoteService<E>>(&mut self, remote: &R) -> Result<usize> {
        if self.has_pending_changes() {
            let counts = self.pending_counts();
            return Err(CacheError::PendingChanges {
                added: counts.added,
                updated: counts.updated,
                deleted: counts.deleted,
            });
        }
        let entities = remote
            .get_all_entities()
            .await
            .map_err(CacheError::RemoteFetch)?;
        self.override_from_list(entities)?;
        info!(cache = %self.name, count = self.entities.len(), "Cache refreshed from server");
        Ok(self.entities.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::RemoteCall;
    use crate::remote::InMemoryRemote;
    use crate::testing::Contact;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_order_is_delete_add_update() {
        let remote = InMemoryRemote::<Contact>::new()
            .unwrap()
            .with_entities([Contact::new(1, "A", "s"), Contact::new(2, "B", "s")])
            .unwrap();
        let mut cache = EntityCache::new("contacts").unwrap();
        cache
            .override_from_list(vec![Contact::new(1, "A", "s"), Contact::new(2, "B", "s")])
            .unwrap();

        cache.modify(&2, |c| c.name = "B2".to_string()).unwrap();
        cache.add(Contact::new(3, "C", "s")).unwrap();
        cache.delete(&1).unwrap();

        let report = cache.save_to_server(&remote).await.unwrap();

        assert_eq!(report, SyncReport { deleted: 1, added: 1, updated: 1 });
        assert_eq!(
            remote.calls(),
            vec![RemoteCall::Delete(1), RemoteCall::Put(3), RemoteCall::Put(2)]
        );
        assert_eq!(remote.get(&2).unwrap().name, "B2");
        assert!(remote.get(&1).is_none());
        assert!(!cache.has_pending_changes());
    }

    #[tokio::test]
    async fn test_second_save_is_a_no_op() {
        let remote = InMemoryRemote::<Contact>::new().unwrap();
        let mut cache = EntityCache::new("contacts").unwrap();
        cache.add(Contact::new(1, "A", "s")).unwrap();
        cache.add(Contact::new(2, "B", "s")).unwrap();

        cache.save_to_server(&remote).await.unwrap();
        assert!(!cache.has_pending_changes());
        remote.clear_calls();

        let report = cache.save_to_server(&remote).await.unwrap();
        assert_eq!(report.total(), 0);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_progress_events_are_ordered() {
        let remote = InMemoryRemote::<Contact>::new().unwrap();
        let mut cache = EntityCache::new("contacts").unwrap();
        for id in 1..=3 {
            cache.add(Contact::new(id, "n", "s")).unwrap();
        }

        let events = Mutex::new(Vec::new());
        TransactionQueue::new(&remote)
            .on_progress(|event: &TransactionEvent<'_, Contact>| {
                events
                    .lock()
                    .unwrap()
                    .push((event.kind, event.total, event.sequence, event.entity.id));
            })
            .run(&mut cache)
            .await
            .unwrap();

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 3);
        for (i, (kind, total, sequence, _)) in events.iter().enumerate() {
            assert_eq!(*kind, TransactionKind::Add);
            assert_eq!(*total, 3);
            assert_eq!(*sequence, i + 1);
        }
    }

    #[tokio::test]
    async fn test_failure_leaves_suffix_dirty() {
        let remote = InMemoryRemote::<Contact>::new().unwrap();
        let mut cache: EntityCache<Contact> = EntityCache::new("contacts").unwrap();
        for id in 1..=5 {
            cache.add(Contact::new(id, "n", "s")).unwrap();
        }
        // The position of key 3 in the queue is only known at run time
        remote.fail_on(3);

        let completed = Mutex::new(Vec::new());
        let err = TransactionQueue::new(&remote)
            .on_progress(|event: &TransactionEvent<'_, Contact>| {
                completed.lock().unwrap().push(event.entity.id);
            })
            .run(&mut cache)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Remote { kind: TransactionKind::Add, ref key, .. } if key == "3"
        ));

        let completed = completed.into_inner().unwrap();
        let attempted: Vec<i64> = remote
            .calls()
            .into_iter()
            .map(|call| match call {
                RemoteCall::Put(id) => id,
                other => panic!("unexpected call {:?}", other),
            })
            .collect();
        // Everything before the failure was sent once and cleared
        assert_eq!(attempted.last(), Some(&3));
        assert_eq!(&attempted[..attempted.len() - 1], completed.as_slice());
        for id in &completed {
            assert!(!cache.is_added(id));
        }
        // The failed entity and the rest stay pending
        assert_eq!(cache.pending_counts().added, 5 - completed.len());
        assert!(cache.is_added(&3));

        remote.recover();
        remote.clear_calls();
        let report = cache.save_to_server(&remote).await.unwrap();
        assert_eq!(report.added, 5 - completed.len());
        assert_eq!(remote.len(), 5);
        // No entity is delivered twice
        for id in &completed {
            assert!(!remote.calls().contains(&RemoteCall::Put(*id)));
        }
    }

    #[tokio::test]
    async fn test_failed_delete_stops_before_adds() {
        let remote = InMemoryRemote::<Contact>::new().unwrap();
        let mut cache = synced_cache(&remote, &[1, 2]).await;
        cache.delete(&1).unwrap();
        cache.add(Contact::new(7, "n", "s")).unwrap();
        remote.fail_on(1);

        let err = cache.save_to_server(&remote).await.unwrap_err();
        assert!(matches!(err, CacheError::Remote { kind: TransactionKind::Delete, .. }));
        assert_eq!(remote.calls(), vec![RemoteCall::Delete(1)]);
        assert!(cache.is_deleted(&1));
        assert!(cache.is_added(&7));
    }

    #[tokio::test]
    async fn test_cancel_keeps_unprocessed_entities() {
        let remote = InMemoryRemote::<Contact>::new().unwrap();
        let mut cache: EntityCache<Contact> = EntityCache::new("contacts").unwrap();
        for id in 1..=4 {
            cache.add(Contact::new(id, "n", "s")).unwrap();
        }

        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        let err = TransactionQueue::new(&remote)
            .with_cancel(cancel)
            .on_progress(move |event: &TransactionEvent<'_, Contact>| {
                if event.sequence == 2 {
                    trigger.cancel();
                }
            })
            .run(&mut cache)
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Cancelled));
        assert_eq!(remote.len(), 2);
        assert_eq!(cache.pending_counts().added, 2);
        for id in 1..=4 {
            assert_eq!(remote.get(&id).is_some(), !cache.is_added(&id));
        }
    }

    #[tokio::test]
    async fn test_refresh_from_server() {
        let remote = InMemoryRemote::<Contact>::new()
            .unwrap()
            .with_entities([Contact::new(4, "D", "s"), Contact::new(5, "E", "s")])
            .unwrap();
        let mut cache: EntityCache<Contact> = EntityCache::new("contacts").unwrap();

        let count = cache.refresh_from_server(&remote).await.unwrap();
        assert_eq!(count, 2);
        assert!(cache.exists(&4) && cache.exists(&5));
        assert!(!cache.has_pending_changes());

        cache.add(Contact::new(6, "F", "s")).unwrap();
        let err = cache.refresh_from_server(&remote).await.unwrap_err();
        assert!(matches!(err, CacheError::PendingChanges { added: 1, .. }));
        assert!(cache.exists(&6));
    }

    async fn synced_cache(remote: &InMemoryRemote<Contact>, ids: &[i64]) -> EntityCache<Contact> {
        let mut cache = EntityCache::new("contacts").unwrap();
        for &id in ids {
            let contact = Contact::new(id, &format!("C{}", id), "active");
            remote.put_entity(&contact).await.unwrap();
            cache.add(contact).unwrap();
        }
        cache.save_to_server(remote).await.unwrap();
        remote.clear_calls();
        cache
    }

    #[test]
    fn test_cancel_handle_reset() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        clone.cancel();
        assert!(handle.is_cancelled());
        handle.reset();
        assert!(!clone.is_cancelled());
    }
}
