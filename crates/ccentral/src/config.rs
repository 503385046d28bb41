// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client settings and environment-driven loading.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use tracing::warn;

use crate::counter::MAX_CAPACITY;
use crate::error::Error;
use crate::histogram::HistogramMode;

/// Default etcd member the client connects to.
pub const DEFAULT_TARGET: &str = "127.0.0.1:2379";
/// Default minimum time between two refresh cycles.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
/// Default width of a rolling counter bucket.
pub const DEFAULT_COUNTER_INTERVAL: Duration = Duration::from_secs(60);
/// Default number of closed buckets a rolling counter keeps.
pub const DEFAULT_COUNTER_CAPACITY: usize = 60;
/// Hostname reported when none can be determined.
pub const UNKNOWN_HOSTNAME: &str = "N/A";

const ENV_TARGET: &str = "CCENTRAL_ETCD";
const ENV_UPDATE_INTERVAL: &str = "CCENTRAL_UPDATE_INTERVAL";
const ENV_REQUIRED_ON_LAUNCH: &str = "CCENTRAL_REQUIRED_ON_LAUNCH";
const ENV_FAIL_LOUDLY: &str = "CCENTRAL_FAIL_LOUDLY";
const ENV_AUTO_REFRESH: &str = "CCENTRAL_AUTO_REFRESH";
const ENV_HISTOGRAM_MODE: &str = "CCENTRAL_HISTOGRAM_MODE";
const ENV_HOSTNAME: &str = "HOSTNAME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Service namespace under `/ccentral/services/`.
    pub service_name: String,
    /// etcd member as `host:port` or base URL. Only used by [`crate::Client::connect`].
    pub store_target: String,
    /// Minimum time between two pull/push cycles.
    pub update_interval: Duration,
    /// Fail the first pull loudly when the store is unreachable.
    pub required_on_launch: bool,
    /// With `required_on_launch`, fail every unreachable pull instead of only the first.
    pub fail_loudly: bool,
    /// Whether reporting calls run the refresh gate.
    pub auto_refresh: bool,
    pub histogram_mode: HistogramMode,
    pub counter_interval: Duration,
    pub counter_capacity: usize,
    /// Host identifier included in every instance snapshot.
    pub hostname: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            store_target: DEFAULT_TARGET.to_string(),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            required_on_launch: false,
            fail_loudly: false,
            auto_refresh: true,
            histogram_mode: HistogramMode::default(),
            counter_interval: DEFAULT_COUNTER_INTERVAL,
            counter_capacity: DEFAULT_COUNTER_CAPACITY,
            hostname: UNKNOWN_HOSTNAME.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Builds settings for `service_name` from the process environment.
    pub fn from_os_env(service_name: impl Into<String>) -> Self {
        Self::from_env_iter(service_name, env::vars())
    }

    /// Builds settings from key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(service_name: impl Into<String>, iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let defaults = Self::new(service_name);

        let store_target = map
            .get(ENV_TARGET)
            .and_then(|value| non_empty(value))
            .unwrap_or(defaults.store_target);
        let update_interval = map
            .get(ENV_UPDATE_INTERVAL)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.update_interval);
        let histogram_mode = match map.get(ENV_HISTOGRAM_MODE) {
            Some(value) => value.parse().unwrap_or_else(|err| {
                warn!("{ENV_HISTOGRAM_MODE}: {err}; using {}", defaults.histogram_mode);
                defaults.histogram_mode
            }),
            None => defaults.histogram_mode,
        };
        let hostname = map
            .get(ENV_HOSTNAME)
            .and_then(|value| non_empty(value))
            .unwrap_or(defaults.hostname);

        Self {
            store_target,
            update_interval,
            required_on_launch: parse_bool(map.get(ENV_REQUIRED_ON_LAUNCH), false),
            fail_loudly: parse_bool(map.get(ENV_FAIL_LOUDLY), false),
            auto_refresh: parse_bool(map.get(ENV_AUTO_REFRESH), true),
            histogram_mode,
            hostname,
            ..defaults
        }
    }

    /// Replaces unusable values with defaults.
    pub fn sanitise(mut self) -> Self {
        if self.update_interval.as_secs() == 0 {
            warn!(
                "update interval {:?} is below one second; using {:?}",
                self.update_interval, DEFAULT_UPDATE_INTERVAL
            );
            self.update_interval = DEFAULT_UPDATE_INTERVAL;
        }
        if self.counter_interval.as_secs() == 0 {
            warn!(
                "counter interval {:?} is below one second; using {:?}",
                self.counter_interval, DEFAULT_COUNTER_INTERVAL
            );
            self.counter_interval = DEFAULT_COUNTER_INTERVAL;
        }
        if self.counter_capacity > MAX_CAPACITY {
            warn!(
                "counter capacity {} exceeds {MAX_CAPACITY}; capping",
                self.counter_capacity
            );
            self.counter_capacity = MAX_CAPACITY;
        }
        if self.hostname.trim().is_empty() {
            self.hostname = UNKNOWN_HOSTNAME.to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        let name = self.service_name.trim();
        if name.is_empty() {
            return Err(Error::InvalidConfig(
                "service name cannot be empty".to_string(),
            ));
        }
        if name.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "service name '{name}' cannot contain '/'"
            )));
        }
        Ok(())
    }

    /// Time-to-live of the instance snapshot: two update intervals.
    pub fn snapshot_ttl(&self) -> Duration {
        self.update_interval.saturating_mul(2)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(value: Option<&String>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("svc");
        assert_eq!(config.store_target, "127.0.0.1:2379");
        assert_eq!(config.update_interval, Duration::from_secs(60));
        assert!(!config.required_on_launch);
        assert!(!config.fail_loudly);
        assert!(config.auto_refresh);
        assert_eq!(config.histogram_mode, HistogramMode::Cumulative);
        assert_eq!(config.hostname, "N/A");
        assert_eq!(config.snapshot_ttl(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_iter() {
        let config = ClientConfig::from_env_iter(
            "svc",
            vec![
                ("CCENTRAL_ETCD", "etcd:4001"),
                ("CCENTRAL_UPDATE_INTERVAL", "15"),
                ("CCENTRAL_REQUIRED_ON_LAUNCH", "true"),
                ("CCENTRAL_FAIL_LOUDLY", "1"),
                ("CCENTRAL_AUTO_REFRESH", "off"),
                ("CCENTRAL_HISTOGRAM_MODE", "reset"),
                ("HOSTNAME", "web-7"),
            ],
        );
        assert_eq!(config.service_name, "svc");
        assert_eq!(config.store_target, "etcd:4001");
        assert_eq!(config.update_interval, Duration::from_secs(15));
        assert!(config.required_on_launch);
        assert!(config.fail_loudly);
        assert!(!config.auto_refresh);
        assert_eq!(config.histogram_mode, HistogramMode::ResetOnPublish);
        assert_eq!(config.hostname, "web-7");
    }

    #[test]
    fn test_from_env_iter_ignores_garbage() {
        let config = ClientConfig::from_env_iter(
            "svc",
            vec![
                ("CCENTRAL_ETCD", "  "),
                ("CCENTRAL_UPDATE_INTERVAL", "soon"),
                ("CCENTRAL_REQUIRED_ON_LAUNCH", "maybe"),
                ("CCENTRAL_HISTOGRAM_MODE", "sliding"),
                ("HOSTNAME", ""),
            ],
        );
        assert_eq!(config, ClientConfig::new("svc"));
    }

    #[test]
    fn test_sanitise_replaces_zero_intervals() {
        let config = ClientConfig {
            update_interval: Duration::from_millis(10),
            counter_interval: Duration::ZERO,
            hostname: " ".into(),
            ..ClientConfig::new("svc")
        }
        .sanitise();
        assert_eq!(config.update_interval, DEFAULT_UPDATE_INTERVAL);
        assert_eq!(config.counter_interval, DEFAULT_COUNTER_INTERVAL);
        assert_eq!(config.hostname, UNKNOWN_HOSTNAME);
    }

    #[test]
    fn test_sanitise_caps_counter_capacity() {
        let config = ClientConfig {
            counter_capacity: usize::MAX,
            ..ClientConfig::new("svc")
        }
        .sanitise();
        assert_eq!(config.counter_capacity, MAX_CAPACITY);

        let config = ClientConfig::new("svc").sanitise();
        assert_eq!(config.counter_capacity, DEFAULT_COUNTER_CAPACITY);
    }

    #[test]
    fn test_validate_service_name() {
        assert!(ClientConfig::new("").validate().is_err());
        assert!(ClientConfig::new("   ").validate().is_err());
        assert!(ClientConfig::new("a/b").validate().is_err());
        assert!(ClientConfig::new("billing").validate().is_ok());
    }
}
