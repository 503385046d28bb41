// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local aggregation of reported failures between publish cycles.

use std::collections::HashMap;
use std::error::Error as StdError;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Error record as stored remotely under `.../errors/{hash}`.
///
/// `traceback` holds the JSON-encoded list of trace lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub count: u64,
    #[serde(default)]
    pub traceback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<i64>,
}

impl ErrorRecord {
    pub fn new(lines: &[String]) -> Self {
        Self {
            count: 1,
            traceback: Value::from(lines.to_vec()).to_string(),
            last: None,
        }
    }
}

/// Renders an error and its `source()` chain, outermost first.
pub fn trace_lines(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut lines = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    lines
}

/// Stable identifier derived from trace text.
pub fn trace_hash(lines: &[String]) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
pub struct PendingErrors {
    records: HashMap<String, ErrorRecord>,
}

impl PendingErrors {
    /// Counts one occurrence and returns the key it was grouped under.
    pub fn record(&mut self, key: Option<&str>, lines: Vec<String>) -> String {
        let key = match key {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => trace_hash(&lines),
        };
        self.records
            .entry(key.clone())
            .and_modify(|record| record.count = record.count.saturating_add(1))
            .or_insert_with(|| ErrorRecord::new(&lines));
        key
    }

    pub fn get(&self, key: &str) -> Option<&ErrorRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Takes every pending record, leaving the set empty.
    pub fn drain(&mut self) -> Vec<(String, ErrorRecord)> {
        self.records.drain().collect()
    }
}
