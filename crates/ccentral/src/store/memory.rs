// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process [`KvStore`] for embedding without etcd and for tests.
//!
//! TTLs are recorded but not enforced.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{KvStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    writes: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds a value without counting it as a client write.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().entries.insert(
            key.into(),
            Entry {
                value: value.into(),
                ttl: None,
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.lock().entries.remove(key).map(|entry| entry.value)
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().entries.get(key).map(|entry| entry.value.clone())
    }

    /// TTL of the last write to `key`, if any.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.lock().entries.get(key).and_then(|entry| entry.ttl)
    }

    /// Number of `set` calls issued for `key`.
    pub fn write_count(&self, key: &str) -> usize {
        self.lock().writes.get(key).copied().unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.value(key))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                ttl,
            },
        );
        *inner.writes.entry(key.to_string()).or_default() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_tracks_value_ttl_and_writes() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1", Some(Duration::from_secs(5))).unwrap();
        store.set("a", "2", None).unwrap();

        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));
        assert_eq!(store.ttl("a"), None);
        assert_eq!(store.write_count("a"), 2);
    }

    #[test]
    fn test_insert_is_not_a_write() {
        let store = MemoryStore::new();
        store.insert("b", "seed");
        assert_eq!(store.value("b").as_deref(), Some("seed"));
        assert_eq!(store.write_count("b"), 0);
        assert_eq!(store.remove("b").as_deref(), Some("seed"));
        assert!(store.keys().is_empty());
    }
}
