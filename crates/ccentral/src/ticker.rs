// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Opt-in background refresher.
//!
//! The client never starts a thread on its own. Hosts that want telemetry
//! published while no calls are being made can spawn a [`Ticker`], which runs
//! the refresh gate every `period` until it is stopped or dropped.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::client::Client;

#[derive(Debug)]
pub struct Ticker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn(client: Arc<Client>, period: Duration) -> io::Result<Self> {
        let (shutdown, shutdown_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("ccentral-ticker".into())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(err) = client.refresh(false) {
                            warn!(%err, "background refresh failed");
                        }
                    }
                    // Explicit stop or the handle was dropped.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("ticker shutting down");
                        break;
                    }
                }
            })?;
        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for an in-flight refresh to finish.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("ticker thread panicked");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::store::MemoryStore;
    use std::time::Instant;

    #[test]
    fn test_ticker_refreshes_until_stopped() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(Client::with_store(ClientConfig::new("svc"), store.clone()).unwrap());
        let instance_key = format!("/ccentral/services/svc/clients/{}", client.instance_id());

        let ticker = Ticker::spawn(Arc::clone(&client), Duration::from_millis(10)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.write_count(&instance_key) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        ticker.stop();

        assert_eq!(store.write_count(&instance_key), 1);
        assert!(client.last_check().is_some());
    }

    #[test]
    fn test_dropping_ticker_joins_thread() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(Client::with_store(ClientConfig::new("svc"), store).unwrap());
        let ticker = Ticker::spawn(Arc::clone(&client), Duration::from_secs(3600)).unwrap();
        drop(ticker);
        assert_eq!(Arc::strong_count(&client), 1);
    }
}
