// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Timing histograms backed by an agent-style DDSketch.

use std::fmt;
use std::str::FromStr;

use ddsketch_agent::DDSketch;

/// What happens to a histogram once it has been summarised into a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistogramMode {
    /// Observations accumulate for the lifetime of the process.
    #[default]
    Cumulative,
    /// Observations are dropped after every published snapshot.
    ResetOnPublish,
}

impl FromStr for HistogramMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cumulative" => Ok(Self::Cumulative),
            "reset" | "reset_on_publish" => Ok(Self::ResetOnPublish),
            other => Err(format!("unknown histogram mode '{other}'")),
        }
    }
}

impl fmt::Display for HistogramMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cumulative => f.write_str("cumulative"),
            Self::ResetOnPublish => f.write_str("reset"),
        }
    }
}

/// Percentiles published for a histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramSummary {
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub median: f64,
}

impl HistogramSummary {
    /// Wire order used in the instance snapshot.
    pub fn to_array(&self) -> [f64; 4] {
        [self.p75, self.p95, self.p99, self.median]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Histogram {
    sketch: DDSketch,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        self.sketch.insert(value);
    }

    pub fn count(&self) -> u64 {
        u64::from(self.sketch.count())
    }

    pub fn is_empty(&self) -> bool {
        self.sketch.count() == 0
    }

    /// Returns `None` until at least one value has been recorded.
    pub fn summary(&self) -> Option<HistogramSummary> {
        if self.is_empty() {
            return None;
        }
        Some(HistogramSummary {
            p75: self.sketch.quantile(0.75)?,
            p95: self.sketch.quantile(0.95)?,
            p99: self.sketch.quantile(0.99)?,
            median: self.sketch.quantile(0.5)?,
        })
    }

    pub fn reset(&mut self) {
        self.sketch = DDSketch::default();
    }
}
