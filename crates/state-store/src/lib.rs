//! Concurrency-safe shared state store.
//!
//! One value slot per well-known [`StateKey`], one async lock per key so
//! writes to the same key are serialized while unrelated keys never
//! contend. Change notification is accounting only (the message bus is the
//! delivery channel in this system): a counter bumps once per distinct
//! value transition, and subscriber registration exists purely for
//! diagnostics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use pagecrew_core_types::StateKey;

/// Interval between wait_for polls. Kept short so waiters observe writes
/// promptly without busy-spinning the runtime.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum StateError {
    /// A wait exceeded its deadline. Always recoverable.
    #[error("timeout waiting for {key}")]
    Timeout { key: StateKey },
}

/// Shared key/value store for agent coordination.
///
/// Values are `serde_json::Value` so every record in the data model can be
/// stored uniformly; typed callers serialize on write and deserialize on
/// read.
#[derive(Default)]
pub struct SharedState {
    data: DashMap<StateKey, Value>,
    locks: DashMap<StateKey, Arc<Mutex<()>>>,
    subscribers: DashMap<StateKey, DashSet<String>>,
    notifications: DashMap<StateKey, u64>,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn key_lock(&self, key: StateKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Non-blocking read. Returns `None` when the key is absent.
    pub fn get(&self, key: StateKey) -> Option<Value> {
        self.data.get(&key).map(|entry| entry.value().clone())
    }

    /// Non-blocking read with a fallback. Never fails.
    pub fn get_or(&self, key: StateKey, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Typed read: deserialize the stored value, `None` when absent or the
    /// stored shape does not match `T`.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: StateKey) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Replace the value under `key`. Writes to the same key serialize on
    /// the per-key lock; the change counter bumps only when the new value
    /// differs from the old by equality, and does so while the lock is
    /// still held so readers never observe a half-applied transition.
    pub async fn set(&self, key: StateKey, value: Value) {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        let old = self.data.insert(key, value.clone());
        if old.as_ref() != Some(&value) {
            self.note_change(key);
        }
    }

    /// Serialize `value` and store it under `key`.
    pub async fn set_as<T: serde::Serialize>(
        &self,
        key: StateKey,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.set(key, value).await;
        Ok(())
    }

    /// Merge `updates` into the object stored under `key`. When the current
    /// value is not an object the updates replace it wholesale; absent keys
    /// are treated as an empty object.
    pub async fn update(&self, key: StateKey, updates: Map<String, Value>) {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        let merged = match self.data.get(&key).map(|e| e.value().clone()) {
            Some(Value::Object(mut existing)) => {
                existing.extend(updates);
                Value::Object(existing)
            }
            _ => Value::Object(updates),
        };
        let old = self.data.insert(key, merged.clone());
        if old.as_ref() != Some(&merged) {
            self.note_change(key);
        }
    }

    /// Remove a key and its lock.
    pub fn delete(&self, key: StateKey) {
        self.data.remove(&key);
        self.locks.remove(&key);
    }

    /// Wait until `key` holds a value. Equivalent to
    /// [`wait_for_with`](Self::wait_for_with) with an always-true predicate.
    pub async fn wait_for(&self, key: StateKey, timeout: Duration) -> Result<Value, StateError> {
        self.wait_for_with(key, timeout, |_| true).await
    }

    /// Wait until `key` holds a value satisfying `predicate`, polling at a
    /// fixed short interval. The per-key lock is never held across a sleep;
    /// the deadline elapsing yields a recoverable [`StateError::Timeout`].
    pub async fn wait_for_with<P>(
        &self,
        key: StateKey,
        timeout: Duration,
        predicate: P,
    ) -> Result<Value, StateError>
    where
        P: Fn(&Value) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(value) = self.get(key) {
                if predicate(&value) {
                    return Ok(value);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StateError::Timeout { key });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Register an agent's interest in a key. Bookkeeping only; delivery of
    /// changes happens on the message bus.
    pub fn subscribe(&self, key: StateKey, agent: impl Into<String>) {
        self.subscribers.entry(key).or_default().insert(agent.into());
    }

    pub fn unsubscribe(&self, key: StateKey, agent: &str) {
        if let Some(entry) = self.subscribers.get(&key) {
            entry.value().remove(agent);
        }
    }

    /// Agents currently registered on a key.
    pub fn subscribers(&self, key: StateKey) -> Vec<String> {
        self.subscribers
            .get(&key)
            .map(|entry| entry.value().iter().map(|a| a.key().clone()).collect())
            .unwrap_or_default()
    }

    /// Number of distinct value transitions recorded for a key.
    pub fn notification_count(&self, key: StateKey) -> u64 {
        self.notifications.get(&key).map(|e| *e.value()).unwrap_or(0)
    }

    /// Shallow copy of every current key/value pair.
    pub fn snapshot(&self) -> HashMap<StateKey, Value> {
        self.data
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Drop all data, locks and counters. Called at task end.
    pub fn clear(&self) {
        self.data.clear();
        self.locks.clear();
        self.notifications.clear();
    }

    /// Compact diagnostic view of the task context.
    pub fn context_summary(&self) -> Value {
        let page_type = self
            .get(StateKey::PerceptionResult)
            .and_then(|v| v.get("page_type").cloned())
            .unwrap_or(Value::Null);
        json!({
            "url": self.get_or(StateKey::CurrentUrl, Value::Null),
            "page_title": self.get_or(StateKey::PageTitle, Value::Null),
            "page_type": page_type,
            "progress": self.get_or(StateKey::ProgressScore, json!(0.0)),
            "last_action": self.get_or(StateKey::LastAction, Value::Null),
            "task_status": self.get_or(StateKey::TaskStatus, json!("pending")),
        })
    }

    fn note_change(&self, key: StateKey) {
        let subscriber_count = self
            .subscribers
            .get(&key)
            .map(|e| e.value().len())
            .unwrap_or(0);
        *self.notifications.entry(key).or_insert(0) += 1;
        debug!(%key, subscriber_count, "state value changed");
    }
}
