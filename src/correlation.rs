//! Correlation store.
//!
//! Maps `(kind, external id)` to the identifier the destination assigned.
//! Seeded from the destination's persisted correlation metadata at startup,
//! then kept current as entities are created, so lookups never go back to the
//! destination. The store is owned by the single pipeline task.

use crate::error::{ImportError, ImportResult};
use crate::ident::{self, InternalKey, MalformedIdentifier};
use crate::models::{DestinationId, EntityKind};
use std::collections::HashMap;

/// Kind-specific metadata persisted alongside a correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryMeta {
    None,
    User {
        disabled: bool,
    },
    Project {
        deleted: bool,
    },
    /// Topic-roots are post number 1 of their topic.
    Post {
        topic_id: DestinationId,
        post_number: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationEntry {
    pub kind: EntityKind,
    pub external_id: String,
    pub key: InternalKey,
    pub destination_id: DestinationId,
    pub meta: EntryMeta,
}

impl CorrelationEntry {
    pub fn new(
        kind: EntityKind,
        external_id: impl Into<String>,
        key: InternalKey,
        destination_id: DestinationId,
        meta: EntryMeta,
    ) -> Self {
        Self {
            kind,
            external_id: external_id.into(),
            key,
            destination_id,
            meta,
        }
    }
}

#[derive(Debug, Default)]
pub struct CorrelationStore {
    entries: HashMap<(EntityKind, InternalKey), CorrelationEntry>,
    reverse: HashMap<(EntityKind, DestinationId), InternalKey>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CorrelationEntry>) -> Self {
        let mut store = Self::new();
        for entry in entries {
            store.record_created(entry);
        }
        store
    }

    /// Record (or refresh) the correlation for an entity.
    pub fn record_created(&mut self, entry: CorrelationEntry) {
        let slot = (entry.kind, entry.key);
        if let Some(previous) = self.entries.get(&slot) {
            if previous.destination_id != entry.destination_id {
                log::warn!(
                    "{} {} re-correlated from {} to {}",
                    entry.kind,
                    entry.external_id,
                    previous.destination_id,
                    entry.destination_id
                );
                self.reverse.remove(&(entry.kind, previous.destination_id));
            }
        }
        self.reverse
            .insert((entry.kind, entry.destination_id), entry.key);
        self.entries.insert(slot, entry);
    }

    pub fn lookup_by_external_id(
        &self,
        kind: EntityKind,
        external_id: &str,
    ) -> Result<Option<&CorrelationEntry>, MalformedIdentifier> {
        let key = ident::encode(external_id)?;
        Ok(self.lookup_by_key(kind, key))
    }

    pub fn lookup_by_key(&self, kind: EntityKind, key: InternalKey) -> Option<&CorrelationEntry> {
        self.entries.get(&(kind, key))
    }

    pub fn lookup_destination_id_by_internal_key(
        &self,
        kind: EntityKind,
        key: InternalKey,
    ) -> Option<DestinationId> {
        self.lookup_by_key(kind, key).map(|entry| entry.destination_id)
    }

    pub fn lookup_internal_key_by_destination_id(
        &self,
        kind: EntityKind,
        destination_id: DestinationId,
    ) -> Option<InternalKey> {
        self.reverse.get(&(kind, destination_id)).copied()
    }

    /// Look up an entity that must already have been imported.
    pub fn require(&self, kind: EntityKind, external_id: &str) -> ImportResult<&CorrelationEntry> {
        self.lookup_by_external_id(kind, external_id)?
            .ok_or_else(|| ImportError::dangling(kind, external_id))
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.entries.keys().filter(|(k, _)| *k == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries ordered by kind then key.
    pub fn snapshot(&self) -> Vec<CorrelationEntry> {
        let mut entries: Vec<CorrelationEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|entry| (entry.kind, entry.key));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_entry(guid: &str, id: DestinationId) -> CorrelationEntry {
        CorrelationEntry::new(
            EntityKind::User,
            guid,
            ident::encode(guid).unwrap(),
            id,
            EntryMeta::User { disabled: false },
        )
    }

    #[test]
    fn test_lookup_both_directions() {
        let store = CorrelationStore::from_entries([user_entry("abc12", 42)]);
        let key = ident::encode("abc12").unwrap();

        let entry = store
            .lookup_by_external_id(EntityKind::User, "ABC12")
            .unwrap()
            .unwrap();
        assert_eq!(entry.destination_id, 42);
        assert_eq!(
            store.lookup_destination_id_by_internal_key(EntityKind::User, key),
            Some(42)
        );
        assert_eq!(
            store.lookup_internal_key_by_destination_id(EntityKind::User, 42),
            Some(key)
        );
    }

    #[test]
    fn test_kinds_are_separate_namespaces() {
        let store = CorrelationStore::from_entries([user_entry("abc12", 42)]);
        assert!(
            store
                .lookup_by_external_id(EntityKind::Project, "abc12")
                .unwrap()
                .is_none()
        );
        assert_eq!(store.count(EntityKind::User), 1);
        assert_eq!(store.count(EntityKind::Project), 0);
    }

    #[test]
    fn test_require_reports_dangling_reference() {
        let store = CorrelationStore::new();
        let err = store.require(EntityKind::User, "zzzzz").unwrap_err();
        assert!(matches!(
            err,
            ImportError::DanglingReference { kind: EntityKind::User, ref external_id } if external_id == "zzzzz"
        ));

        let err = store.require(EntityKind::User, "no-such").unwrap_err();
        assert!(matches!(err, ImportError::MalformedIdentifier(_)));
    }

    #[test]
    fn test_recorrelation_replaces_reverse_mapping() {
        let mut store = CorrelationStore::from_entries([user_entry("abc12", 42)]);
        store.record_created(user_entry("abc12", 43));

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.lookup_internal_key_by_destination_id(EntityKind::User, 42),
            None
        );
        assert!(
            store
                .lookup_internal_key_by_destination_id(EntityKind::User, 43)
                .is_some()
        );
    }
}
