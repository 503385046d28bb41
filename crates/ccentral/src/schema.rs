// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved config key carrying the configuration version.
pub const VERSION_KEY: &str = "v";
/// Version reported when no configuration has been stored for the service.
pub const VERSION_DEFAULTS: &str = "defaults";
/// Version reported when the stored configuration lacks a `v` entry.
pub const VERSION_UNKNOWN: &str = "unknown";

/// A field the service declares it understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Stringified default value.
    pub default: String,
    pub description: String,
}

impl SchemaField {
    pub fn new(
        title: impl Into<String>,
        kind: impl Into<String>,
        default: impl ToString,
        description: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            kind: kind.into(),
            default: default.to_string(),
            description: description.into(),
        }
    }
}

/// One operator override as stored in the remote config record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    #[serde(default)]
    pub value: Value,
}

impl ConfigEntry {
    /// Returns the override as text; non-string JSON values are rendered as JSON.
    pub fn as_text(&self) -> String {
        match &self.value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Derives the version string from a pulled configuration.
pub fn config_version(config: &HashMap<String, ConfigEntry>) -> String {
    match config.get(VERSION_KEY) {
        Some(entry) if !entry.value.is_null() => entry.as_text(),
        _ => VERSION_UNKNOWN.to_string(),
    }
}
