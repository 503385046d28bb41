// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CCentral client library.
//!
//! A service registers the configuration fields it understands, reads
//! operator overrides with [`Client::get`], and reports counters, timings,
//! instance facts and errors. Everything is reconciled with a shared etcd
//! namespace (`/ccentral/services/{service}`) lazily, from inside those calls,
//! at most once per update interval.
//!
//! ```no_run
//! use ccentral::Client;
//!
//! # fn main() -> Result<(), ccentral::Error> {
//! let client = Client::new("billing", "127.0.0.1:2379", 60)?;
//! client.register_field("retries", "Retries", "integer", 3, "Attempts per request");
//! let retries: u32 = client.get("retries")?.parse().unwrap_or(3);
//! client.increment_counter("invoices", 1)?;
//! # let _ = retries;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod counter;
pub mod error;
pub mod exception;
pub mod histogram;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod ticker;

pub use client::{unix_now, Client};
pub use config::ClientConfig;
pub use counter::RollingCounter;
pub use error::Error;
pub use exception::ErrorRecord;
pub use histogram::{Histogram, HistogramMode, HistogramSummary};
pub use schema::{ConfigEntry, SchemaField};
pub use snapshot::InstanceSnapshot;
pub use store::{EtcdStore, KvStore, MemoryStore, RemoteStore, StoreError};
pub use ticker::Ticker;
