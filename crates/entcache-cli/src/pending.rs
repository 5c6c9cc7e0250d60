//! Pending changes carried between runs.
//!
//! The cache keeps its dirty sets in memory only. The CLI records them next
//! to the snapshot so a later `push` can send what an earlier run could not.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use entcache_core::{EntityCache, JsonCodec, SnapshotCodec};

use crate::contact::Contact;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingJournal {
    pub added: Vec<i64>,
    pub updated: Vec<i64>,
    /// Deleted contacts are kept whole, the snapshot no longer has them.
    pub deleted: Vec<Contact>,
}

impl PendingJournal {
    pub fn capture(cache: &EntityCache<Contact>) -> Self {
        let mut journal = Self {
            added: cache.added_entities().iter().map(|c| c.id).collect(),
            updated: cache.updated_entities().iter().map(|c| c.id).collect(),
            deleted: cache.deleted_entities().into_iter().cloned().collect(),
        };
        journal.added.sort_unstable();
        journal.updated.sort_unstable();
        journal.deleted.sort_by_key(|c| c.id);
        journal
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        JsonCodec
            .deserialize_from_file(path)
            .with_context(|| format!("Failed to read pending changes from {}", path.display()))
    }

    /// An empty journal removes the file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if self.is_empty() {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            return Ok(());
        }
        JsonCodec
            .serialize_to_file(self, path)
            .with_context(|| format!("Failed to record pending changes in {}", path.display()))
    }

    /// Rebuild the dirty sets of a freshly loaded cache.
    pub fn replay(self, cache: &mut EntityCache<Contact>) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let added: HashSet<i64> = self.added.iter().copied().collect();
        let (fresh, mut synced): (Vec<Contact>, Vec<Contact>) =
            cache.iter().cloned().partition(|c| added.contains(&c.id));
        synced.extend(self.deleted.iter().cloned());

        // Deleted contacts come back as synced ones, then are deleted again
        cache.clear();
        cache.override_from_list(synced)?;
        for contact in fresh {
            cache.add(contact)?;
        }
        for id in &self.updated {
            if cache.exists(id) {
                cache.notify_entity_updated(id)?;
            } else {
                warn!(id, "Pending update for a contact missing from the snapshot");
            }
        }
        for contact in &self.deleted {
            cache.delete(&contact.id)?;
        }
        debug!(pending = cache.pending_counts().total(), "Pending changes restored");
        Ok(())
    }
}
