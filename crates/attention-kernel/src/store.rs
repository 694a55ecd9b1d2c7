//! Concept store: persistent records of serialized concepts keyed by
//! (concept id, version).
//!
//! The kernel treats the store as an external collaborator and only depends
//! on the [`ConceptStore`] trait. Payload bytes are opaque here.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::concept::{ClassId, ConceptId, Version};
use crate::error::StoreError;

/// One stored concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptRecord {
    pub cid: ConceptId,
    pub ver: Version,
    pub class: ClassId,
    /// Data responsible for logic and behavior
    pub stable: Option<Vec<u8>>,
    /// Changeable data like usage statistics
    pub transient: Option<Vec<u8>>,
}

/// CRUD access to concept records.
pub trait ConceptStore: Send + Sync {
    fn insert(&self, record: ConceptRecord) -> Result<(), StoreError>;

    fn get(&self, cid: ConceptId, ver: Version) -> Result<Option<ConceptRecord>, StoreError>;

    fn update(&self, record: ConceptRecord) -> Result<(), StoreError>;

    fn delete(&self, cid: ConceptId, ver: Version) -> Result<(), StoreError>;

    /// All versions of a concept in ascending order, `None` if it has none.
    fn versions(&self, cid: ConceptId) -> Result<Option<Vec<Version>>, StoreError>;
}

/// Store kept in process memory.
///
/// Using DashMap for thread-safe concurrent access.
#[derive(Debug, Default)]
pub struct InMemoryConceptStore {
    records: DashMap<(ConceptId, Version), ConceptRecord>,
    unavailable: bool,
}

impl InMemoryConceptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose handles could not be prepared; every call fails.
    pub fn unavailable() -> Self {
        Self {
            records: DashMap::new(),
            unavailable: true,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl ConceptStore for InMemoryConceptStore {
    fn insert(&self, record: ConceptRecord) -> Result<(), StoreError> {
        self.check()?;
        match self.records.entry((record.cid, record.ver)) {
            Entry::Occupied(_) => Err(StoreError::Duplicate {
                cid: record.cid,
                ver: record.ver,
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(())
            }
        }
    }

    fn get(&self, cid: ConceptId, ver: Version) -> Result<Option<ConceptRecord>, StoreError> {
        self.check()?;
        Ok(self.records.get(&(cid, ver)).map(|r| r.value().clone()))
    }

    fn update(&self, record: ConceptRecord) -> Result<(), StoreError> {
        self.check()?;
        match self.records.get_mut(&(record.cid, record.ver)) {
            Some(mut existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                cid: record.cid,
                ver: record.ver,
            }),
        }
    }

    fn delete(&self, cid: ConceptId, ver: Version) -> Result<(), StoreError> {
        self.check()?;
        self.records
            .remove(&(cid, ver))
            .map(|_| ())
            .ok_or(StoreError::NotFound { cid, ver })
    }

    fn versions(&self, cid: ConceptId) -> Result<Option<Vec<Version>>, StoreError> {
        self.check()?;
        let mut versions: Vec<Version> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == cid)
            .map(|entry| entry.key().1)
            .collect();
        if versions.is_empty() {
            return Ok(None);
        }
        versions.sort_unstable();
        Ok(Some(versions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cid: ConceptId, ver: Version) -> ConceptRecord {
        ConceptRecord {
            cid,
            ver,
            class: 4,
            stable: Some(vec![1, 2, 3]),
            transient: None,
        }
    }

    #[test]
    fn test_crud_cycle() {
        let store = InMemoryConceptStore::new();
        store.insert(record(10, 0)).unwrap();
        assert!(matches!(
            store.insert(record(10, 0)),
            Err(StoreError::Duplicate { cid: 10, ver: 0 })
        ));

        let mut changed = record(10, 0);
        changed.transient = Some(vec![9]);
        store.update(changed.clone()).unwrap();
        assert_eq!(store.get(10, 0).unwrap(), Some(changed));

        store.delete(10, 0).unwrap();
        assert_eq!(store.get(10, 0).unwrap(), None);
        assert!(matches!(
            store.delete(10, 0),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_versions_sorted_or_absent() {
        let store = InMemoryConceptStore::new();
        assert_eq!(store.versions(5).unwrap(), None);
        for ver in [3, 1, 2] {
            store.insert(record(5, ver)).unwrap();
        }
        store.insert(record(6, 0)).unwrap();
        assert_eq!(store.versions(5).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_unavailable_store_rejects_everything() {
        let store = InMemoryConceptStore::unavailable();
        assert!(matches!(
            store.insert(record(1, 0)),
            Err(StoreError::Unavailable)
        ));
        assert!(matches!(store.get(1, 0), Err(StoreError::Unavailable)));
        assert!(matches!(store.versions(1), Err(StoreError::Unavailable)));
    }
}
