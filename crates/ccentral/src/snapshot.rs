// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-instance telemetry payload published on every refresh cycle.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::histogram::HistogramSummary;

/// Client library tag reported as `cv`.
pub const CLIENT_VERSION: &str = concat!("rust-", env!("CARGO_PKG_VERSION"));
/// Snapshot protocol version reported as `av`.
pub const API_VERSION: &str = "1";

const COUNTER_PREFIX: &str = "c_";
const HISTOGRAM_PREFIX: &str = "h_";
const INSTANCE_PREFIX: &str = "k_";

/// Version of the compiler that built the crate.
pub const RUSTC_VERSION: &str = env!("CCENTRAL_RUSTC_VERSION");

/// Runtime tag reported as `lv`.
pub fn runtime_version() -> String {
    format!(
        "rust {} ({}/{})",
        RUSTC_VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Process identity fields that do not change between snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMeta {
    pub started: i64,
    pub update_interval_secs: u64,
    pub hostname: String,
}

/// Flat JSON object describing one running instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSnapshot {
    fields: Map<String, Value>,
}

impl InstanceSnapshot {
    pub fn new(meta: &InstanceMeta, version: &str, now: i64) -> Self {
        let mut fields = Map::new();
        fields.insert("v".into(), Value::from(version));
        fields.insert("cv".into(), Value::from(CLIENT_VERSION));
        fields.insert("lv".into(), Value::from(runtime_version()));
        fields.insert("av".into(), Value::from(API_VERSION));
        fields.insert("ts".into(), Value::from(now));
        fields.insert("started".into(), Value::from(meta.started));
        fields.insert("uinterval".into(), Value::from(meta.update_interval_secs));
        fields.insert("hostname".into(), Value::from(meta.hostname.as_str()));
        Self { fields }
    }

    pub fn add_instance_fields(&mut self, fields: &BTreeMap<String, Value>) {
        for (key, value) in fields {
            self.fields
                .insert(format!("{INSTANCE_PREFIX}{key}"), value.clone());
        }
    }

    pub fn add_counter(&mut self, key: &str, history: Vec<u64>) {
        self.fields
            .insert(format!("{COUNTER_PREFIX}{key}"), Value::from(history));
    }

    pub fn add_histogram(&mut self, key: &str, summary: &HistogramSummary) {
        self.fields.insert(
            format!("{HISTOGRAM_PREFIX}{key}"),
            Value::from(summary.to_array().to_vec()),
        );
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}
