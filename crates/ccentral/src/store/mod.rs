// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote store access for CCentral.
//!
//! [`KvStore`] is the minimal get/set-with-TTL contract the client needs from
//! the shared key-value store. [`RemoteStore`] layers the CCentral key layout
//! on top of it and implements the read-merge-write protocol used to aggregate
//! error counts across instances. Neither type retries: tolerance policy lives
//! in the client, which absorbs these errors.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::exception::ErrorRecord;
use crate::schema::{ConfigEntry, SchemaField};

pub mod etcd;
pub mod memory;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

/// Default lifetime of ad-hoc service metrics.
pub const TTL_DAY: Duration = Duration::from_secs(24 * 60 * 60);
/// Lifetime of aggregated error records.
pub const TTL_WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Root of every key written by the client.
const SERVICE_BASE: &str = "/ccentral/services";

/// Errors raised by store transports.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status} for key {key}")]
    Status { status: u16, key: String },
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid store target: {0}")]
    InvalidTarget(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Minimal contract required from the remote key-value store.
///
/// A missing key is reported as `Ok(None)`, never as an error.
pub trait KvStore: Send + Sync + fmt::Debug {
    /// Reads the raw value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes `value` under `key`, expiring after `ttl` when provided.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Rebuilds the underlying connection (for example after a fork).
    fn reconnect(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Key layout under `/ccentral/services/{service}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceKeys {
    base: String,
}

impl ServiceKeys {
    pub fn new(service: &str) -> Self {
        Self {
            base: format!("{SERVICE_BASE}/{service}"),
        }
    }

    pub fn schema(&self) -> String {
        format!("{}/schema", self.base)
    }

    pub fn config(&self) -> String {
        format!("{}/config", self.base)
    }

    pub fn client(&self, instance_id: &str) -> String {
        format!("{}/clients/{instance_id}", self.base)
    }

    pub fn info(&self, key: &str) -> String {
        format!("{}/info/{key}", self.base)
    }

    pub fn error(&self, error_hash: &str) -> String {
        format!("{}/errors/{error_hash}", self.base)
    }
}

/// Service-scoped adapter over a [`KvStore`].
///
/// Owns only the transport handle and the key layout; it keeps no domain state.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    store: Arc<dyn KvStore>,
    keys: ServiceKeys,
}

impl RemoteStore {
    pub fn new(store: Arc<dyn KvStore>, service: &str) -> Self {
        Self {
            store,
            keys: ServiceKeys::new(service),
        }
    }

    pub fn keys(&self) -> &ServiceKeys {
        &self.keys
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.store.get(key)
    }

    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.store.set(key, value, ttl)
    }

    pub fn reconnect(&self) -> Result<(), StoreError> {
        self.store.reconnect()
    }

    /// Publishes the schema. The record never expires.
    pub fn push_schema(&self, schema: &BTreeMap<String, SchemaField>) -> Result<(), StoreError> {
        let payload = serde_json::to_string(schema)?;
        self.store.set(&self.keys.schema(), &payload, None)
    }

    /// Pulls the operator overrides.
    ///
    /// Returns `Ok(None)` when no configuration has been stored for the service yet.
    pub fn pull_config(&self) -> Result<Option<HashMap<String, ConfigEntry>>, StoreError> {
        match self.store.get(&self.keys.config())? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Publishes a serialized instance snapshot under the instance key.
    pub fn push_instance(
        &self,
        instance_id: &str,
        payload: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.store.set(&self.keys.client(instance_id), payload, Some(ttl))
    }

    /// Writes a service level fact directly, bypassing the snapshot.
    pub fn put_info(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.store.set(&self.keys.info(key), value, Some(ttl))
    }

    /// Folds `record` into the error record stored under `error_hash`.
    ///
    /// The existing count is read and added to the incoming one; the incoming
    /// trace wins and `last` is set to `now`. A failed or unreadable read counts
    /// as "no record". This is a single read followed by a single write, so two
    /// publishers racing on the same hash can lose an increment.
    pub fn merge_error(
        &self,
        error_hash: &str,
        record: &ErrorRecord,
        now: i64,
    ) -> Result<ErrorRecord, StoreError> {
        let key = self.keys.error(error_hash);
        let mut merged = record.clone();
        match self.store.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str::<ErrorRecord>(&raw) {
                Ok(existing) => merged.count = merged.count.saturating_add(existing.count),
                Err(err) => debug!(%key, %err, "ignoring unreadable error record"),
            },
            Ok(None) => {}
            Err(err) => debug!(%key, %err, "error record read failed, treating as absent"),
        }
        merged.last = Some(now);
        let payload = serde_json::to_string(&merged)?;
        self.store.set(&key, &payload, Some(TTL_WEEK))?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct ReadFailingStore {
        inner: MemoryStore,
    }

    impl KvStore for ReadFailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("read refused".into()))
        }

        fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
            self.inner.set(key, value, ttl)
        }
    }

    fn record(count: u64) -> ErrorRecord {
        ErrorRecord {
            count,
            traceback: r#"["boom"]"#.to_string(),
            last: None,
        }
    }

    #[test]
    fn test_key_layout() {
        let keys = ServiceKeys::new("billing");
        assert_eq!(keys.schema(), "/ccentral/services/billing/schema");
        assert_eq!(keys.config(), "/ccentral/services/billing/config");
        assert_eq!(keys.client("abc"), "/ccentral/services/billing/clients/abc");
        assert_eq!(keys.info("build"), "/ccentral/services/billing/info/build");
        assert_eq!(keys.error("f00"), "/ccentral/services/billing/errors/f00");
    }

    #[test]
    fn test_merge_error_on_fresh_key_stores_incoming_record() {
        let memory = Arc::new(MemoryStore::new());
        let remote = RemoteStore::new(memory.clone(), "svc");

        let written = remote.merge_error("h1", &record(2), 1_000).unwrap();
        assert_eq!(written, ErrorRecord { last: Some(1_000), ..record(2) });

        let stored: ErrorRecord =
            serde_json::from_str(&memory.value("/ccentral/services/svc/errors/h1").unwrap())
                .unwrap();
        assert_eq!(stored, written);
        assert_eq!(memory.ttl("/ccentral/services/svc/errors/h1"), Some(TTL_WEEK));
    }

    #[test]
    fn test_merge_error_adds_to_existing_count() {
        let memory = Arc::new(MemoryStore::new());
        memory.insert(
            "/ccentral/services/svc/errors/h1",
            r#"{"count":3,"traceback":"[\"older\"]","last":10}"#,
        );
        let remote = RemoteStore::new(memory.clone(), "svc");

        let written = remote.merge_error("h1", &record(2), 2_000).unwrap();
        assert_eq!(written.count, 5);
        assert_eq!(written.traceback, r#"["boom"]"#);
        assert_eq!(written.last, Some(2_000));
    }

    #[test]
    fn test_merge_error_treats_read_failure_as_absent() {
        let store = Arc::new(ReadFailingStore {
            inner: MemoryStore::new(),
        });
        let remote = RemoteStore::new(store.clone(), "svc");

        let written = remote.merge_error("h1", &record(4), 5).unwrap();
        assert_eq!(written.count, 4);
        assert!(store.inner.value("/ccentral/services/svc/errors/h1").is_some());
    }

    #[test]
    fn test_merge_error_ignores_corrupt_existing_record() {
        let memory = Arc::new(MemoryStore::new());
        memory.insert("/ccentral/services/svc/errors/h1", "not json");
        let remote = RemoteStore::new(memory, "svc");

        let written = remote.merge_error("h1", &record(1), 5).unwrap();
        assert_eq!(written.count, 1);
    }

    #[test]
    fn test_pull_config_distinguishes_absent_from_empty() {
        let memory = Arc::new(MemoryStore::new());
        let remote = RemoteStore::new(memory.clone(), "svc");
        assert!(remote.pull_config().unwrap().is_none());

        memory.insert("/ccentral/services/svc/config", "{}");
        assert_eq!(remote.pull_config().unwrap(), Some(HashMap::new()));
    }

    #[test]
    fn test_pull_config_rejects_malformed_payload() {
        let memory = Arc::new(MemoryStore::new());
        memory.insert("/ccentral/services/svc/config", "[1, 2");
        let remote = RemoteStore::new(memory, "svc");
        assert!(matches!(remote.pull_config(), Err(StoreError::Decode(_))));
    }
}
