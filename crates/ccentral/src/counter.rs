// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity sliding window of per-interval totals.
//!
//! A counter keeps one open bucket starting at `bucket_start` and a history of
//! closed buckets, oldest first. Closing happens lazily whenever the counter is
//! advanced to a time past the open bucket's end. Bucket boundaries stay
//! aligned to the counter's creation time.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Upper bound on retained buckets: one week of minute buckets.
pub const MAX_CAPACITY: usize = 7 * 24 * 60;

#[derive(Debug)]
struct Window {
    history: VecDeque<u64>,
    current: u64,
    bucket_start: i64,
}

#[derive(Debug)]
pub struct RollingCounter {
    interval: i64,
    capacity: usize,
    window: Mutex<Window>,
}

impl RollingCounter {
    /// Creates a counter whose first bucket opens at `now` (unix seconds).
    ///
    /// `capacity` is capped at [`MAX_CAPACITY`].
    pub fn new(now: i64, interval: Duration, capacity: usize) -> Self {
        let capacity = capacity.min(MAX_CAPACITY);
        let interval = i64::try_from(interval.as_secs()).unwrap_or(i64::MAX).max(1);
        Self {
            interval,
            capacity,
            window: Mutex::new(Window {
                history: VecDeque::with_capacity(capacity),
                current: 0,
                bucket_start: now,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Closes every bucket that ended before `now`.
    ///
    /// A `now` at or behind the open bucket's end is a no-op, so time never
    /// moves backwards.
    pub fn advance(&self, now: i64) {
        let mut window = self.lock();
        self.advance_locked(&mut window, now);
    }

    pub fn increment(&self, amount: u64, now: i64) {
        let mut window = self.lock();
        self.advance_locked(&mut window, now);
        window.current = window.current.saturating_add(amount);
    }

    /// Closed buckets, oldest first. The open bucket is not included.
    pub fn history(&self) -> Vec<u64> {
        self.lock().history.iter().copied().collect()
    }

    /// Total of the still-open bucket.
    pub fn current(&self) -> u64 {
        self.lock().current
    }

    pub fn bucket_start(&self) -> i64 {
        self.lock().bucket_start
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn advance_locked(&self, window: &mut Window, now: i64) {
        let elapsed = now.saturating_sub(window.bucket_start);
        if elapsed <= self.interval {
            return;
        }
        // Number of buckets whose end lies strictly before `now`.
        let steps = (elapsed - 1) / self.interval;

        if steps > i64::try_from(self.capacity).unwrap_or(i64::MAX) {
            // Every bucket still in range was idle.
            window.history.clear();
            window.history.resize(self.capacity, 0);
        } else {
            window.history.push_back(window.current);
            for _ in 1..steps {
                window.history.push_back(0);
            }
            while window.history.len() > self.capacity {
                window.history.pop_front();
            }
        }
        window.current = 0;
        window.bucket_start = window
            .bucket_start
            .saturating_add(steps.saturating_mul(self.interval));
    }
}
