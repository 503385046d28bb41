// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Synchronization engine and the reporting API built on top of it.
//!
//! There is no background worker: every public call checks the refresh gate
//! inline and, when the update interval has elapsed, pulls the configuration
//! and publishes the instance snapshot on the calling thread. An idle service
//! performs no I/O at all.
//!
//! All domain state sits behind a single mutex that is never held across
//! remote calls. A second mutex serialises refresh cycles. Once a cycle has
//! completed, a caller that finds another one running skips the gate and works
//! with cached state; before that, it waits for the running cycle.

use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::counter::RollingCounter;
use crate::error::Error;
use crate::exception::{trace_lines, PendingErrors};
use crate::histogram::{Histogram, HistogramMode};
use crate::schema::{config_version, ConfigEntry, SchemaField, VERSION_DEFAULTS};
use crate::snapshot::{InstanceMeta, InstanceSnapshot};
use crate::store::{EtcdStore, KvStore, RemoteStore, TTL_DAY};

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct EngineState {
    schema: BTreeMap<String, SchemaField>,
    schema_pushed: bool,
    config: HashMap<String, ConfigEntry>,
    version: String,
    /// Time of the last completed cycle; `None` until the first one.
    last_check: Option<i64>,
    instance_fields: BTreeMap<String, Value>,
    counters: HashMap<String, Arc<RollingCounter>>,
    histograms: HashMap<String, Histogram>,
    errors: PendingErrors,
}

/// Handle a service uses to publish its schema, read overrides and report telemetry.
///
/// Cheap to share behind an [`Arc`]; every method takes `&self`.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    remote: RemoteStore,
    instance_id: String,
    started: i64,
    state: Mutex<EngineState>,
    refresh_lock: Mutex<()>,
}

impl Client {
    /// Connects to etcd at `target` (`host:port`) with the given update interval in seconds.
    pub fn new(service_name: &str, target: &str, update_interval_secs: u64) -> Result<Self, Error> {
        let mut config = ClientConfig::from_os_env(service_name);
        config.store_target = target.to_string();
        config.update_interval = Duration::from_secs(update_interval_secs);
        Self::connect(config)
    }

    /// Connects to the etcd member named by `config.store_target`.
    pub fn connect(config: ClientConfig) -> Result<Self, Error> {
        let store = EtcdStore::new(&config.store_target)
            .map_err(|err| Error::InvalidTarget(err.to_string()))?;
        Self::with_store(config, Arc::new(store))
    }

    /// Builds a client on top of a pre-built store handle.
    pub fn with_store(config: ClientConfig, store: Arc<dyn KvStore>) -> Result<Self, Error> {
        let config = config.sanitise();
        config.validate()?;
        let remote = RemoteStore::new(store, config.service_name.trim());
        Ok(Self {
            config,
            remote,
            instance_id: Uuid::new_v4().simple().to_string(),
            started: unix_now(),
            state: Mutex::new(EngineState::default()),
            refresh_lock: Mutex::new(()),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        self.refresh_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Random identifier of this process in the remote store.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Time of the last completed refresh cycle.
    pub fn last_check(&self) -> Option<i64> {
        self.lock_state().last_check
    }

    pub fn pending_error_count(&self) -> usize {
        self.lock_state().errors.len()
    }

    /// Rebuilds the store connection, e.g. in a forked child.
    pub fn reconnect(&self) {
        if let Err(err) = self.remote.reconnect() {
            warn!(%err, "could not reconnect to the remote store");
        }
    }

    /// Declares a configuration field. Takes effect remotely with the first schema push.
    pub fn register_field(
        &self,
        key: &str,
        title: &str,
        kind: &str,
        default: impl ToString,
        description: &str,
    ) {
        let field = SchemaField::new(title, kind, default, description);
        self.lock_state().schema.insert(key.to_string(), field);
    }

    /// Resolves `key`: pulled override first, then the schema default.
    pub fn get(&self, key: &str) -> Result<String, Error> {
        self.refresh(false)?;
        let state = self.lock_state();
        if let Some(entry) = state.config.get(key) {
            return Ok(entry.as_text());
        }
        if let Some(field) = state.schema.get(key) {
            return Ok(field.default.clone());
        }
        Err(Error::ConfigNotDefined {
            key: key.to_string(),
        })
    }

    /// Version of the cached configuration (`"defaults"` when none is stored).
    pub fn get_version(&self) -> Result<String, Error> {
        self.refresh(false)?;
        Ok(self.lock_state().version.clone())
    }

    /// Writes a service level fact straight to the store; `ttl` defaults to one day.
    pub fn report_service_metric(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        if let Err(err) = self.remote.put_info(key, value, ttl.unwrap_or(TTL_DAY)) {
            warn!(key, %err, "could not store service metric");
        }
        self.auto_refresh(unix_now())
    }

    /// Stages an instance field; it is published with every following snapshot.
    pub fn report_instance_metric(&self, key: &str, value: impl Into<Value>) -> Result<(), Error> {
        self.lock_state()
            .instance_fields
            .insert(key.to_string(), value.into());
        self.auto_refresh(unix_now())
    }

    pub fn increment_counter(&self, key: &str, amount: u64) -> Result<(), Error> {
        self.increment_counter_at(key, amount, unix_now())
    }

    /// Adds `amount` to the counter `key` as of `now` (unix seconds).
    pub fn increment_counter_at(&self, key: &str, amount: u64, now: i64) -> Result<(), Error> {
        let counter = {
            let mut state = self.lock_state();
            let counter = state.counters.entry(key.to_string()).or_insert_with(|| {
                Arc::new(RollingCounter::new(
                    now,
                    self.config.counter_interval,
                    self.config.counter_capacity,
                ))
            });
            Arc::clone(counter)
        };
        counter.increment(amount, now);
        self.auto_refresh(now)
    }

    /// Folds a timing observation into the histogram `key`. Does not refresh.
    pub fn record_timing(&self, key: &str, value: f64) {
        self.lock_state()
            .histograms
            .entry(key.to_string())
            .or_default()
            .record(value);
    }

    /// Counts an error for publishing; returns the key it was grouped under.
    ///
    /// Without `key`, occurrences are grouped by a hash of the error chain.
    pub fn log_error(&self, error: &(dyn StdError + 'static), key: Option<&str>) -> String {
        self.log_exception(key, trace_lines(error))
    }

    /// Like [`Client::log_error`] for pre-rendered trace lines.
    pub fn log_exception(&self, key: Option<&str>, lines: Vec<String>) -> String {
        self.lock_state().errors.record(key, lines)
    }

    fn auto_refresh(&self, now: i64) -> Result<(), Error> {
        if self.config.auto_refresh {
            self.refresh_at(false, now)
        } else {
            Ok(())
        }
    }

    pub fn refresh(&self, force: bool) -> Result<(), Error> {
        self.refresh_at(force, unix_now())
    }

    /// Runs the refresh gate as of `now`.
    ///
    /// The schema is pushed on the first call that reaches the gate. A full
    /// cycle runs when forced or once more than the update interval has passed
    /// since the last one. Only a failed pull on a `required_on_launch` client
    /// (first cycle, or any cycle with `fail_loudly`) returns an error.
    pub fn refresh_at(&self, force: bool, now: i64) -> Result<(), Error> {
        // No cycle has completed yet: wait for the in-flight one.
        let _cycle = if self.lock_state().last_check.is_none() {
            self.lock_refresh()
        } else {
            match self.refresh_lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    debug!("refresh already in progress; using cached state");
                    return Ok(());
                }
            }
        };

        let interval = i64::try_from(self.config.update_interval.as_secs()).unwrap_or(i64::MAX);
        let (schema, due, first_cycle) = {
            let state = self.lock_state();
            let schema = (!state.schema_pushed).then(|| state.schema.clone());
            let due = force
                || state
                    .last_check
                    .map_or(true, |last| now.saturating_sub(last) > interval);
            (schema, due, state.last_check.is_none())
        };

        if let Some(schema) = schema {
            self.push_schema(&schema);
        }
        if !due {
            return Ok(());
        }

        debug!(service = %self.config.service_name, now, "starting refresh cycle");
        self.pull_config(first_cycle)?;
        self.lock_state().last_check = Some(now);
        self.publish(now);
        Ok(())
    }

    fn push_schema(&self, schema: &BTreeMap<String, SchemaField>) {
        match self.remote.push_schema(schema) {
            Ok(()) => {
                debug!(fields = schema.len(), "schema published");
                self.lock_state().schema_pushed = true;
            }
            Err(err) => warn!(%err, "could not store schema"),
        }
    }

    fn pull_config(&self, first_cycle: bool) -> Result<(), Error> {
        match self.remote.pull_config() {
            Ok(Some(config)) => {
                let version = config_version(&config);
                let mut state = self.lock_state();
                state.config = config;
                state.version = version;
                Ok(())
            }
            Ok(None) => {
                let mut state = self.lock_state();
                state.config.clear();
                state.version = VERSION_DEFAULTS.to_string();
                Ok(())
            }
            Err(err) => {
                warn!(%err, "could not pull configuration; keeping cached values");
                if (first_cycle || self.config.fail_loudly) && self.config.required_on_launch {
                    Err(Error::ConfigPullFailed(err))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Publishes the instance snapshot and drains pending errors as of `now`.
    ///
    /// Waits for an in-flight refresh cycle to finish first. Failures are
    /// logged and swallowed. Pending errors are cleared whether or not their
    /// merge succeeds.
    pub fn push_snapshot_at(&self, now: i64) {
        let _cycle = self.lock_refresh();
        self.publish(now);
    }

    /// Caller must hold `refresh_lock`.
    fn publish(&self, now: i64) {
        let (snapshot, errors) = {
            let mut state = self.lock_state();
            let meta = InstanceMeta {
                started: self.started,
                update_interval_secs: self.config.update_interval.as_secs(),
                hostname: self.config.hostname.clone(),
            };
            let mut snapshot = InstanceSnapshot::new(&meta, &state.version, now);
            snapshot.add_instance_fields(&state.instance_fields);
            for (key, counter) in &state.counters {
                counter.advance(now);
                snapshot.add_counter(key, counter.history());
            }
            let reset = self.config.histogram_mode == HistogramMode::ResetOnPublish;
            for (key, histogram) in state.histograms.iter_mut() {
                if let Some(summary) = histogram.summary() {
                    snapshot.add_histogram(key, &summary);
                }
                if reset {
                    histogram.reset();
                }
            }
            (snapshot, state.errors.drain())
        };

        if let Err(err) = self.remote.push_instance(
            &self.instance_id,
            &snapshot.to_json(),
            self.config.snapshot_ttl(),
        ) {
            warn!(%err, "could not store client info");
        }
        for (hash, record) in errors {
            if let Err(err) = self.remote.merge_error(&hash, &record, now) {
                warn!(error_hash = %hash, %err, "could not store error record");
            }
        }
    }
}
