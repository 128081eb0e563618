//! Committed record store backed by [`DashMap`].
//!
//! Holds only durable, globally visible rows. Provisional writes live in the
//! [`TransactionCoordinator`](super::TransactionCoordinator) until commit.

use dashmap::DashMap;
use uuid::Uuid;

/// A person row, keyed by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRecord {
    pub id: Uuid,
    pub name: String,
}

impl PersonRecord {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// Concurrent store of committed rows.
#[derive(Debug, Default)]
pub struct PersonStore {
    rows: DashMap<String, PersonRecord>,
}

impl PersonStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the row with the same name. Returns the previous row.
    pub fn put(&self, record: PersonRecord) -> Option<PersonRecord> {
        self.rows.insert(record.name.clone(), record)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<PersonRecord> {
        self.rows.get(name).map(|r| r.clone())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.rows.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_contains() {
        let store = PersonStore::new();
        assert!(store.is_empty());

        let record = PersonRecord::new("alice");
        assert!(store.put(record.clone()).is_none());
        assert!(store.contains("alice"));
        assert_eq!(store.get("alice"), Some(record));
        assert!(!store.contains("bob"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn put_replaces_same_name() {
        let store = PersonStore::new();
        let first = PersonRecord::new("alice");
        store.put(first.clone());
        let previous = store.put(PersonRecord::new("alice"));
        assert_eq!(previous, Some(first));
        assert_eq!(store.len(), 1);
    }
}
