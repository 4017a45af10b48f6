// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Change observation for tier-A keys
//!
//! All watched keys share one polling task, started when the first watcher
//! subscribes and stopped when the last one unsubscribes. Notifications are
//! deduplicated by value equality, so a rewrite of an identical value is
//! silent. `trigger` lets a writer in the same process notify watchers
//! immediately instead of waiting for the next tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::tier_a::LocalStore;

/// Called with the key's new value, or `None` when the key was removed or
/// is unreadable.
pub type ChangeCallback = Arc<dyn Fn(Option<Value>) + Send + Sync>;

struct Watcher {
    id: u64,
    callback: ChangeCallback,
}

#[derive(Default)]
struct ObserverState {
    watchers: HashMap<String, Vec<Watcher>>,
    last_seen: HashMap<String, Option<Value>>,
    next_id: u64,
    timer: Option<JoinHandle<()>>,
}

/// Shared poll-based observer over a tier-A store.
pub struct ChangeObserver {
    tier_a: Arc<LocalStore>,
    poll_interval: Duration,
    state: Mutex<ObserverState>,
}

/// Keeps a subscription alive; dropping it unsubscribes. The polling task
/// stops when the last guard is dropped.
pub struct WatchGuard {
    observer: Arc<ChangeObserver>,
    key: String,
    id: u64,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.observer.unsubscribe(&self.key, self.id);
    }
}

impl ChangeObserver {
    pub fn new(tier_a: Arc<LocalStore>, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            tier_a,
            poll_interval,
            state: Mutex::new(ObserverState::default()),
        })
    }

    /// Subscribe to changes of one key. The callback fires once immediately
    /// with the key's current value, then on every observed change.
    pub fn observe(
        self: &Arc<Self>,
        key: &str,
        callback: impl Fn(Option<Value>) + Send + Sync + 'static,
    ) -> WatchGuard {
        let callback: ChangeCallback = Arc::new(callback);
        let current = self.read_current(key);

        let id = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = state.next_id;

            state
                .watchers
                .entry(key.to_string())
                .or_default()
                .push(Watcher {
                    id,
                    callback: callback.clone(),
                });
            state
                .last_seen
                .entry(key.to_string())
                .or_insert_with(|| current.clone());

            if state.timer.is_none() {
                state.timer = Some(self.spawn_timer());
            }
            id
        };

        callback(current);

        WatchGuard {
            observer: self.clone(),
            key: key.to_string(),
            id,
        }
    }

    /// Notify watchers of a key right now, without waiting for the next
    /// poll tick. Writers call this after a same-process mutation; value
    /// deduplication still applies.
    pub fn trigger(&self, key: &str) {
        self.check_key(key);
    }

    /// Whether the shared polling task is currently running.
    pub fn is_polling(&self) -> bool {
        self.state.lock().unwrap().timer.is_some()
    }

    fn spawn_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<ChangeObserver> = Arc::downgrade(self);
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(observer) = weak.upgrade() else {
                    break;
                };
                observer.poll_all();
            }
        })
    }

    fn poll_all(&self) {
        let keys: Vec<String> = {
            let state = self.state.lock().unwrap();
            state.watchers.keys().cloned().collect()
        };
        for key in keys {
            self.check_key(&key);
        }
    }

    /// Compare a key's current value against the last seen one and notify
    /// its watchers on change. Callbacks run outside the lock. An unwatched
    /// key returns before touching the filesystem, so writers can trigger
    /// unconditionally.
    fn check_key(&self, key: &str) {
        if !self.state.lock().unwrap().watchers.contains_key(key) {
            return;
        }

        let current = self.read_current(key);

        let to_notify: Vec<ChangeCallback> = {
            let mut state = self.state.lock().unwrap();
            let Some(watchers) = state.watchers.get(key) else {
                return;
            };
            if state.last_seen.get(key) == Some(&current) {
                return;
            }
            let callbacks = watchers.iter().map(|w| w.callback.clone()).collect();
            state.last_seen.insert(key.to_string(), current.clone());
            callbacks
        };

        for callback in to_notify {
            callback(current.clone());
        }
    }

    /// Corrupt or unreadable values are reported as absent.
    fn read_current(&self, key: &str) -> Option<Value> {
        self.tier_a.get(key).ok().flatten()
    }

    fn unsubscribe(&self, key: &str, id: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(watchers) = state.watchers.get_mut(key) {
            watchers.retain(|w| w.id != id);
            if watchers.is_empty() {
                state.watchers.remove(key);
                state.last_seen.remove(key);
            }
        }
        if state.watchers.is_empty() {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }
    }
}
