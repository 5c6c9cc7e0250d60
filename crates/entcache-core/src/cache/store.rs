use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::codec::{JsonCodec, SnapshotCodec};
use crate::error::{CacheError, Result};
use crate::reader::{Entity, EntityDescriptor, FieldValue, PropertyFilter};

/// Sizes of the three dirty sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl PendingCounts {
    pub fn total(&self) -> usize {
        self.added + self.updated + self.deleted
    }
}

/// Identity-keyed store of one entity type with local change tracking.
///
/// Besides the live `entities`, the cache keeps three dirty sets:
///
/// - `added`: keys created locally since the last sync
/// - `updated`: keys reported changed, never also in `added`
/// - `deleted`: entities removed locally that were not added in this session
///
/// Added and updated entries hold keys only, so the value pushed to the
/// remote service is always the current one in `entities`. Changes made
/// through [`get_by_key`](Self::get_by_key) clones or outside the cache must
/// be reported with [`notify_entity_updated`](Self::notify_entity_updated).
pub struct EntityCache<E: Entity, C: SnapshotCodec = JsonCodec> {
    pub(crate) name: String,
    pub(crate) default_file_path: Option<PathBuf>,
    pub(crate) descriptor: EntityDescriptor<E>,
    pub(crate) codec: C,
    pub(crate) entities: HashMap<E::Key, E>,
    pub(crate) added: HashSet<E::Key>,
    pub(crate) updated: HashSet<E::Key>,
    pub(crate) deleted: HashMap<E::Key, E>,
}

impl<E: Entity> EntityCache<E, JsonCodec> {
    /// Create an empty cache that snapshots to JSON.
    pub fn new(name: &str) -> Result<Self> {
        Self::with_codec(name, JsonCodec)
    }
}

impl<E: Entity, C: SnapshotCodec> EntityCache<E, C> {
    /// Create an empty cache with the given snapshot codec.
    /// Fails if the entity type's descriptor does not resolve a surrogate key.
    pub fn with_codec(name: &str, codec: C) -> Result<Self> {
        let name = if name.is_empty() { E::NAME } else { name };
        Ok(Self {
            name: name.to_string(),
            default_file_path: None,
            descriptor: E::descriptor().build()?,
            codec,
            entities: HashMap::new(),
            added: HashSet::new(),
            updated: HashSet::new(),
            deleted: HashMap::new(),
        })
    }

    /// Set the snapshot path used when no explicit path is given.
    pub fn with_default_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_file_path = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_file_path(&self) -> Option<&Path> {
        self.default_file_path.as_deref()
    }

    pub fn descriptor(&self) -> &EntityDescriptor<E> {
        &self.descriptor
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    // ===== Membership =====

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn exists(&self, key: &E::Key) -> bool {
        self.entities.contains_key(key)
    }

    /// Non-failing lookup.
    pub fn get_by_key(&self, key: &E::Key) -> Option<&E> {
        self.entities.get(key)
    }

    /// Lookup that fails with `NotFound` for an absent key.
    pub fn get(&self, key: &E::Key) -> Result<&E> {
        self.entities.get(key).ok_or_else(|| self.not_found(key))
    }

    pub fn keys(&self) -> Vec<E::Key> {
        self.entities.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.entities.values()
    }

    pub fn entities(&self) -> Vec<&E> {
        self.entities.values().collect()
    }

    pub fn added_entities(&self) -> Vec<&E> {
        self.added.iter().filter_map(|k| self.entities.get(k)).collect()
    }

    pub fn updated_entities(&self) -> Vec<&E> {
        self.updated.iter().filter_map(|k| self.entities.get(k)).collect()
    }

    pub fn deleted_entities(&self) -> Vec<&E> {
        self.deleted.values().collect()
    }

    pub fn is_added(&self, key: &E::Key) -> bool {
        self.added.contains(key)
    }

    pub fn is_updated(&self, key: &E::Key) -> bool {
        self.updated.contains(key)
    }

    pub fn is_deleted(&self, key: &E::Key) -> bool {
        self.deleted.contains_key(key)
    }

    pub fn pending_counts(&self) -> PendingCounts {
        PendingCounts {
            added: self.added.len(),
            updated: self.updated.len(),
            deleted: self.deleted.len(),
        }
    }

    pub fn has_pending_changes(&self) -> bool {
        self.pending_counts().total() > 0
    }

    pub fn key_of(&self, entity: &E) -> Result<E::Key> {
        self.descriptor.key_of(entity)
    }

    // ===== Mutation =====

    /// Add an entity under its surrogate key.
    pub fn add(&mut self, entity: E) -> Result<()> {
        let key = self.descriptor.key_of(&entity)?;
        self.insert_added(key, entity)
    }

    /// Add an entity under an explicit key, which must equal the entity's
    /// own key field.
    pub fn add_with_key(&mut self, key: E::Key, entity: E) -> Result<()> {
        let own = self.descriptor.key_of(&entity)?;
        if own != key {
            return Err(CacheError::KeyMismatch {
                entity: E::NAME,
                given: key.to_string(),
                field: own.to_string(),
            });
        }
        self.insert_added(key, entity)
    }

    fn insert_added(&mut self, key: E::Key, entity: E) -> Result<()> {
        if self.entities.contains_key(&key) {
            return Err(self.duplicate(&key));
        }
        if self.deleted.remove(&key).is_some() {
            // The remote service still holds this key; push the new value as an update
            debug!(cache = %self.name, key = %key, "Deleted entity re-added");
            self.entities.insert(key.clone(), entity);
            self.updated.insert(key);
            return Ok(());
        }
        debug!(cache = %self.name, key = %key, "Entity added");
        self.entities.insert(key.clone(), entity);
        self.added.insert(key);
        Ok(())
    }

    /// Remove an entity. An entity added in this session leaves no trace;
    /// anything else is remembered for deletion on the remote service.
    pub fn delete(&mut self, key: &E::Key) -> Result<E> {
        let entity = self
            .entities
            .remove(key)
            .ok_or_else(|| self.not_found(key))?;
        self.updated.remove(key);
        if self.added.remove(key) {
            debug!(cache = %self.name, key = %key, "Locally added entity deleted");
        } else {
            debug!(cache = %self.name, key = %key, "Entity marked for deletion");
            self.deleted.insert(key.clone(), entity.clone());
        }
        Ok(entity)
    }

    /// Mark an entity as changed. Entities already added or updated are
    /// left as they are.
    pub fn notify_entity_updated(&mut self, key: &E::Key) -> Result<()> {
        if !self.entities.contains_key(key) {
            return Err(self.not_found(key));
        }
        if !self.added.contains(key) && self.updated.insert(key.clone()) {
            debug!(cache = %self.name, key = %key, "Entity marked as updated");
        }
        Ok(())
    }

    /// Replace the stored value for the entity's key and mark it as changed.
    pub fn update(&mut self, entity: E) -> Result<()> {
        let key = self.descriptor.key_of(&entity)?;
        match self.entities.get_mut(&key) {
            Some(slot) => *slot = entity,
            None => return Err(self.not_found(&key)),
        }
        self.notify_entity_updated(&key)
    }

    /// Mutate an entity in place and mark it as changed.
    /// The closure must not change the entity's surrogate key.
    pub fn modify<F>(&mut self, key: &E::Key, f: F) -> Result<()>
    where
        F: FnOnce(&mut E),
    {
        let entity = match self.entities.get_mut(key) {
            Some(entity) => entity,
            None => return Err(self.not_found(key)),
        };
        f(entity);
        self.notify_entity_updated(key)
    }

    /// Empty the entity set and every dirty set.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.added.clear();
        self.updated.clear();
        self.deleted.clear();
    }

    /// Replace the entity set with `entities`, keyed by their surrogate keys.
    ///
    /// Dirty sets are not touched, so the replacement is refused with
    /// `PendingChanges` while any of them is non-empty. On error the cache
    /// is left unchanged.
    pub fn override_from_list(&mut self, entities: Vec<E>) -> Result<()> {
        if self.has_pending_changes() {
            let counts = self.pending_counts();
            return Err(CacheError::PendingChanges {
                added: counts.added,
                updated: counts.updated,
                deleted: counts.deleted,
            });
        }
        self.entities = self.index_entities(entities)?;
        debug!(cache = %self.name, count = self.entities.len(), "Entities overridden");
        Ok(())
    }

    /// Key every entity, failing on the first repeated key.
    pub(crate) fn index_entities(&self, entities: Vec<E>) -> Result<HashMap<E::Key, E>> {
        let mut result = HashMap::with_capacity(entities.len());
        for entity in entities {
            let key = self.descriptor.key_of(&entity)?;
            if result.contains_key(&key) {
                return Err(self.duplicate(&key));
            }
            result.insert(key, entity);
        }
        Ok(result)
    }

    // ===== Queries =====

    /// Entities whose fields match `filter`. `None` returns every entity.
    ///
    /// With `exact_match`, each field must equal the expected value. Without
    /// it, text fields match on case-insensitive containment and other
    /// fields still compare by equality. Null only matches null.
    pub fn get_entities_by_properties(
        &self,
        filter: Option<&PropertyFilter>,
        exact_match: bool,
    ) -> Result<Vec<&E>> {
        let filter = match filter {
            Some(filter) => filter,
            None => return Ok(self.entities.values().collect()),
        };
        let compiled = filter.compile(&self.descriptor, exact_match)?;
        Ok(self
            .entities
            .values()
            .filter(|e| compiled.matches(e))
            .collect())
    }

    pub fn get_entity_by_property(
        &self,
        name: &str,
        value: impl Into<FieldValue>,
        exact_match: bool,
    ) -> Result<Option<&E>> {
        let filter = PropertyFilter::new().with(name, value);
        let compiled = filter.compile(&self.descriptor, exact_match)?;
        Ok(self.entities.values().find(|e| compiled.matches(e)))
    }

    /// True if any entity's field equals `value`.
    pub fn property_value_exists(&self, name: &str, value: impl Into<FieldValue>) -> Result<bool> {
        let field = self.descriptor.field(name)?;
        let value = value.into();
        Ok(self.entities.values().any(|e| field.get(e) == value))
    }

    // ===== Errors =====

    pub(crate) fn not_found(&self, key: &E::Key) -> CacheError {
        CacheError::NotFound {
            entity: E::NAME,
            key: key.to_string(),
        }
    }

    pub(crate) fn duplicate(&self, key: &E::Key) -> CacheError {
        CacheError::DuplicateKey {
            entity: E::NAME,
            key: key.to_string(),
        }
    }
}

impl<'a, E: Entity, C: SnapshotCodec> IntoIterator for &'a EntityCache<E, C> {
    type Item = &'a E;
    type IntoIter = std::collections::hash_map::Values<'a, E::Key, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Contact;
    use pretty_assertions::assert_eq;
    use crate::remote::InMemoryRemote;
    use proptest::prelude::*;

    fn cache() -> EntityCache<Contact> {
        EntityCache::new("contacts").unwrap()
    }

    fn sorted_keys<'a>(entities: impl IntoIterator<Item = &'a Contact>) -> Vec<i64> {
        let mut keys: Vec<i64> = entities.into_iter().map(|c| c.id).collect();
        keys.sort();
        keys
    }

    /// Check the dirty-set invariants.
    fn assert_invariants(cache: &EntityCache<Contact>) {
        for key in &cache.added {
            assert!(cache.entities.contains_key(key), "added {} not live", key);
            assert!(!cache.updated.contains(key), "{} both added and updated", key);
        }
        for key in &cache.updated {
            assert!(cache.entities.contains_key(key), "updated {} not live", key);
        }
        for key in cache.deleted.keys() {
            assert!(!cache.entities.contains_key(key), "deleted {} still live", key);
        }
    }

    #[test]
    fn test_add_then_delete_is_net_zero() {
        let mut cache = cache();
        cache.add(Contact::new(1, "A", "active")).unwrap();
        cache.add(Contact::new(2, "B", "active")).unwrap();
        cache.delete(&1).unwrap();

        assert_eq!(cache.keys(), vec![2]);
        assert_eq!(sorted_keys(cache.added_entities()), vec![2]);
        assert!(cache.deleted_entities().is_empty());
        assert_invariants(&cache);
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let mut cache = cache();
        cache.add(Contact::new(1, "A", "active")).unwrap();
        let err = cache.add(Contact::new(1, "Other", "active")).unwrap_err();
        assert!(matches!(err, CacheError::DuplicateKey { key, .. } if key == "1"));
        assert_eq!(cache.get(&1).unwrap().name, "A");
    }

    #[test]
    fn test_add_with_key_must_match_key_field() {
        let mut cache = cache();
        let err = cache
            .add_with_key(10, Contact::new(1, "A", "active"))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::KeyMismatch { ref given, ref field, .. } if given == "10" && field == "1"
        ));
        assert!(cache.is_empty());
        assert!(!cache.has_pending_changes());

        cache.add_with_key(1, Contact::new(1, "A", "active")).unwrap();
        assert!(cache.is_added(&1));

        // The key survives a snapshot round trip
        let text = cache.codec().serialize_to_text(&cache.snapshot()).unwrap();
        let mut reloaded = self::cache();
        reloaded.load_from_text(&text).unwrap();
        assert_eq!(reloaded.keys(), vec![1]);
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let mut cache = cache();
        assert!(matches!(cache.delete(&3), Err(CacheError::NotFound { .. })));
        assert!(matches!(cache.get(&3), Err(CacheError::NotFound { .. })));
        assert!(cache.get_by_key(&3).is_none());
    }

    #[test]
    fn test_delete_synced_entity_is_tracked() {
        let mut cache = cache();
        cache
            .override_from_list(vec![Contact::new(1, "A", "active")])
            .unwrap();
        cache.notify_entity_updated(&1).unwrap();
        let removed = cache.delete(&1).unwrap();

        assert_eq!(removed.name, "A");
        assert!(cache.is_deleted(&1));
        assert!(!cache.is_updated(&1));
        assert_invariants(&cache);
    }

    #[test]
    fn test_re_adding_deleted_key_becomes_update() {
        let mut cache = cache();
        cache
            .override_from_list(vec![Contact::new(1, "A", "active")])
            .unwrap();
        cache.delete(&1).unwrap();
        cache.add(Contact::new(1, "A again", "active")).unwrap();

        assert!(!cache.is_deleted(&1));
        assert!(!cache.is_added(&1));
        assert!(cache.is_updated(&1));
        assert_eq!(cache.get(&1).unwrap().name, "A again");
        assert_invariants(&cache);
    }

    #[test]
    fn test_notify_skips_added_entities() {
        let mut cache = cache();
        cache.add(Contact::new(1, "A", "active")).unwrap();
        cache.notify_entity_updated(&1).unwrap();
        assert!(cache.is_added(&1));
        assert!(!cache.is_updated(&1));

        assert!(matches!(
            cache.notify_entity_updated(&9),
            Err(CacheError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_and_modify_mark_dirty() {
        let mut cache = cache();
        cache
            .override_from_list(vec![
                Contact::new(1, "A", "active"),
                Contact::new(2, "B", "active"),
            ])
            .unwrap();

        cache.update(Contact::new(1, "A2", "away")).unwrap();
        cache.modify(&2, |c| c.visits += 1).unwrap();

        assert_eq!(cache.get(&1).unwrap().name, "A2");
        assert_eq!(cache.get(&2).unwrap().visits, 1);
        assert_eq!(
            cache.pending_counts(),
            PendingCounts { added: 0, updated: 2, deleted: 0 }
        );
        assert!(matches!(
            cache.update(Contact::new(7, "X", "away")),
            Err(CacheError::NotFound { .. })
        ));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut cache = cache();
        cache.override_from_list(vec![Contact::new(1, "A", "active")]).unwrap();
        cache.notify_entity_updated(&1).unwrap();
        cache.add(Contact::new(2, "B", "active")).unwrap();
        cache.clear();

        assert!(cache.is_empty());
        assert!(!cache.has_pending_changes());
    }

    #[test]
    fn test_override_refused_while_dirty() {
        let mut cache = cache();
        cache.add(Contact::new(1, "A", "active")).unwrap();
        let err = cache
            .override_from_list(vec![Contact::new(5, "E", "active")])
            .unwrap_err();
        assert!(matches!(err, CacheError::PendingChanges { added: 1, .. }));
        assert!(cache.exists(&1));
    }

    #[test]
    fn test_override_duplicate_leaves_cache_unchanged() {
        let mut cache = cache();
        cache.override_from_list(vec![Contact::new(1, "A", "active")]).unwrap();
        let err = cache
            .override_from_list(vec![
                Contact::new(2, "B", "active"),
                Contact::new(2, "B again", "active"),
            ])
            .unwrap_err();
        assert!(matches!(err, CacheError::DuplicateKey { .. }));
        assert_eq!(cache.keys(), vec![1]);
    }

    #[test]
    fn test_property_queries() {
        let mut cache = cache();
        cache.add(Contact::new(1, "Ada", "active")).unwrap();
        cache.add(Contact::new(2, "Bob", "Inactive")).unwrap();
        cache.add(Contact::new(3, "Cy", "away")).unwrap();

        let exact = PropertyFilter::new().with("status", "active");
        let found = cache.get_entities_by_properties(Some(&exact), true).unwrap();
        assert_eq!(sorted_keys(found), vec![1]);

        let loose = PropertyFilter::new().with("status", "activ");
        let found = cache.get_entities_by_properties(Some(&loose), false).unwrap();
        assert_eq!(sorted_keys(found), vec![1, 2]);

        let all = cache.get_entities_by_properties(None, true).unwrap();
        assert_eq!(sorted_keys(all), vec![1, 2, 3]);

        let bob = cache.get_entity_by_property("name", "BOB", false).unwrap();
        assert_eq!(bob.map(|c| c.id), Some(2));
        assert!(cache
            .get_entity_by_property("name", "Zed", true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unknown_field_queries_fail() {
        let mut cache = cache();
        cache.add(Contact::new(1, "Ada", "active")).unwrap();

        let filter = PropertyFilter::new().with("colour", "red");
        assert!(matches!(
            cache.get_entities_by_properties(Some(&filter), true),
            Err(CacheError::UnknownField { .. })
        ));
        assert!(matches!(
            cache.property_value_exists("colour", "red"),
            Err(CacheError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_property_value_exists() {
        let mut cache = cache();
        cache.add(Contact::new(1, "Ada", "active")).unwrap();
        assert!(cache.property_value_exists("name", "Ada").unwrap());
        assert!(!cache.property_value_exists("name", "ada").unwrap());
        assert!(cache.property_value_exists("email", FieldValue::Null).unwrap());
    }

    #[test]
    fn test_iteration() {
        let mut cache = cache();
        cache.add(Contact::new(1, "Ada", "active")).unwrap();
        cache.add(Contact::new(2, "Bob", "active")).unwrap();
        assert_eq!(sorted_keys(&cache), vec![1, 2]);
        assert_eq!(cache.iter().count(), 2);
    }

    #[test]
    fn test_empty_name_falls_back_to_entity_name() {
        let cache: EntityCache<Contact> = EntityCache::new("").unwrap();
        assert_eq!(cache.name(), "Contact");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(i64),
        Delete(i64),
        Notify(i64),
        Sync(i64),
        Push(Option<i64>),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0i64..8).prop_map(Op::Add),
            (0i64..8).prop_map(Op::Delete),
            (0i64..8).prop_map(Op::Notify),
            (0i64..8).prop_map(Op::Sync),
            proptest::option::of(0i64..8).prop_map(Op::Push),
        ]
    }

    proptest! {
        #[test]
        fn prop_invariants_hold_after_every_operation(ops in prop::collection::vec(op(), 0..60)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let remote = InMemoryRemote::<Contact>::new().unwrap();
            let mut cache = cache();
            for op in ops {
                // Failing operations must leave the invariants intact too
                let _ = match op {
                    Op::Add(k) => cache.add(Contact::new(k, "n", "s")),
                    Op::Delete(k) => cache.delete(&k).map(|_| ()),
                    Op::Notify(k) => cache.notify_entity_updated(&k),
                    Op::Sync(k) => {
                        // Pretend key k reached the server
                        cache.added.remove(&k);
                        cache.updated.remove(&k);
                        cache.deleted.remove(&k);
                        Ok(())
                    }
                    Op::Push(fail_on) => {
                        remote.recover();
                        if let Some(k) = fail_on {
                            remote.fail_on(k);
                        }
                        let before = cache.pending_counts().total();
                        let pushed = runtime.block_on(cache.save_to_server(&remote));
                        match pushed {
                            Ok(report) => {
                                prop_assert_eq!(report.total(), before);
                                prop_assert!(!cache.has_pending_changes());
                            }
                            Err(_) => prop_assert!(cache.has_pending_changes()),
                        }
                        Ok(())
                    }
                };
                assert_invariants(&cache);
            }
        }
    }
}
