// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! etcd v2 keys API transport.
//!
//! Values are read with `GET /v2/keys{key}` and written with a form-encoded
//! `PUT` carrying `value` and an optional `ttl` in seconds. A 404 answer is
//! the "key not found" outcome.
//!
//! The transport uses reqwest's blocking client, so it must not be created or
//! driven from inside an async runtime worker.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{KvStore, StoreError};

const KEYS_PREFIX: &str = "/v2/keys";

#[derive(Debug, Deserialize)]
struct KeysResponse {
    node: Node,
}

#[derive(Debug, Deserialize)]
struct Node {
    // Directory nodes carry no value.
    value: Option<String>,
}

#[derive(Debug)]
pub struct EtcdStore {
    base_url: String,
    timeout: Option<Duration>,
    client: RwLock<Client>,
}

impl EtcdStore {
    /// Connects to an etcd member given as `host:port` (or a full `http(s)://` URL).
    pub fn new(target: &str) -> Result<Self, StoreError> {
        Self::from_url(parse_target(target)?)
    }

    pub fn from_url(base_url: impl Into<String>) -> Result<Self, StoreError> {
        Self::build(base_url.into(), None)
    }

    /// Like [`EtcdStore::from_url`] but bounds every request by `timeout`.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        Self::build(base_url.into(), Some(timeout))
    }

    fn build(base_url: String, timeout: Option<Duration>) -> Result<Self, StoreError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = build_client(timeout)?;
        Ok(Self {
            base_url,
            timeout,
            client: RwLock::new(client),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn key_url(&self, key: &str) -> String {
        if key.starts_with('/') {
            format!("{}{KEYS_PREFIX}{key}", self.base_url)
        } else {
            format!("{}{KEYS_PREFIX}/{key}", self.base_url)
        }
    }

    fn client(&self) -> Client {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl KvStore for EtcdStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let url = self.key_url(key);
        let response = self.client().get(&url).send()?;
        let status = response.status();
        debug!(method = "GET", url = %url, status = %status, "etcd response");

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                key: key.to_string(),
            });
        }
        let body = response.text()?;
        let parsed: KeysResponse = serde_json::from_str(&body)?;
        Ok(parsed.node.value)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let url = self.key_url(key);
        let mut form = vec![("value", value.to_string())];
        if let Some(ttl) = ttl {
            form.push(("ttl", ttl.as_secs().to_string()));
        }
        let response = self.client().put(&url).form(&form).send()?;
        let status = response.status();
        debug!(
            method = "PUT",
            url = %url,
            status = %status,
            body_len = value.len(),
            "etcd response"
        );

        if status.is_success() {
            Ok(())
        } else {
            Err(StoreError::Status {
                status: status.as_u16(),
                key: key.to_string(),
            })
        }
    }

    fn reconnect(&self) -> Result<(), StoreError> {
        let client = build_client(self.timeout)?;
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
        debug!(base_url = %self.base_url, "etcd client rebuilt");
        Ok(())
    }
}

fn build_client(timeout: Option<Duration>) -> Result<Client, StoreError> {
    let mut builder = Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

/// Turns a `host:port` target into a base URL.
fn parse_target(target: &str) -> Result<String, StoreError> {
    let target = target.trim();
    if target.starts_with("http://") || target.starts_with("https://") {
        return Ok(target.to_string());
    }
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| StoreError::InvalidTarget(target.to_string()))?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(StoreError::InvalidTarget(target.to_string()));
    }
    Ok(format!("http://{host}:{port}"))
}
