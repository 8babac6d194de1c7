// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Deduplicating, rate-limited work queue keyed by object key.
//!
//! A key is held at most once in the queue and is never handed to two workers at the same
//! time: a key added while it is being processed is marked dirty and handed out again once the
//! worker calls [`WorkQueue::done`]. Failed keys are re-added after a per-key exponential
//! backoff that is cleared by [`WorkQueue::forget`].

use crate::constants::queue::{BASE_DELAY_MS, MAX_DELAY_SECS};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

/// Delay before the next retry of a key that failed `failures` times already
pub fn backoff(failures: u32) -> Duration {
    let max = Duration::from_secs(MAX_DELAY_SECS);
    let factor = 2u64.checked_pow(failures).unwrap_or(u64::MAX);
    BASE_DELAY_MS
        .checked_mul(factor)
        .map(Duration::from_millis)
        .map_or(max, |d| d.min(max))
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.shared.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Re-add a key once its backoff has elapsed
    pub fn add_rate_limited(&self, key: &str) {
        let delay = {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                return;
            }
            let failures = state.failures.entry(key.to_string()).or_insert(0);
            let delay = backoff(*failures);
            *failures = failures.saturating_add(1);
            delay
        };

        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Clear the failure count of a key
    pub fn forget(&self, key: &str) {
        self.shared.state.lock().failures.remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.shared
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key; `None` once the queue is shut down
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key handed out by [`WorkQueue::get`] as processed
    pub fn done(&self, key: &str) {
        let mut state = self.shared.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    pub fn shutdown(&self) {
        self.shared.state.lock().shutting_down = true;
        self.shared.notify.notify_waiters();
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
