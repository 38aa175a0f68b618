//! The uniform storage contract every backend implements.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AdapterError;
use crate::health::{HealthReport, StorageUsage, PROBE_TIMEOUT_MS};
use crate::key::PathKey;

/// How a backend acknowledges writes.
///
/// Callers must not infer this from behavior; the adapter declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// `set` returns only after the value reached the persisted medium.
    Synchronous,
    /// `set` returns after updating an in-process cache; persistence happens
    /// later (autosave timer, replication, ...).
    Deferred,
}

/// A change observed at or under a subscribed key.
///
/// `value` is `None` when the key was removed.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: PathKey,
    pub value: Option<Value>,
}

/// Callback invoked for every change delivered to a subscription.
///
/// Delivery timing is backend-specific: watch-based backends push promptly,
/// poll-based backends deliver on their tick (at-least-once, not
/// edge-triggered).
pub type Subscriber = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Handle identifying one subscription on one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// One operation in a `batch` call.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Set { path: PathKey, value: Value },
    Delete { path: PathKey },
}

/// A typed, AND-ed field-equality predicate for `query`.
///
/// Matches only object values whose named top-level fields equal the
/// expected values. No indexing: backends scan linearly.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    clauses: Vec<(String, Value)>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, expected: impl Into<Value>) -> Self {
        self.clauses.push((name.into(), expected.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, value: &Value) -> bool {
        let Some(map) = value.as_object() else {
            return self.clauses.is_empty();
        };
        self.clauses
            .iter()
            .all(|(name, expected)| map.get(name) == Some(expected))
    }
}

/// Cap on per-channel publish history; oldest entries are trimmed past it.
pub const CHANNEL_HISTORY_CAP: usize = 100;

const CHANNELS_PREFIX: &str = "channels";
const PROBE_PREFIX: &str = "_health";

/// The uniform operation set every backend supports.
///
/// Backends differ in durability and notification latency, never in shape:
/// any implementation is interchangeable without caller-side changes.
///
/// # Object Safety
///
/// This trait is object-safe: consumers hold `Arc<dyn StorageAdapter>`.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Registry name of this adapter.
    fn name(&self) -> &str;

    /// Contract version the adapter implements.
    fn version(&self) -> &str {
        "1"
    }

    /// Declared write-acknowledgement style.
    fn durability(&self) -> Durability;

    /// Acquire resources and load existing state. Idempotent in intent;
    /// fails with `AdapterError::Connection` if the backend is unreachable.
    async fn connect(&self) -> Result<(), AdapterError>;

    /// Flush pending writes and release resources.
    async fn disconnect(&self) -> Result<(), AdapterError>;

    fn is_connected(&self) -> bool;

    /// Read the value at `path`. Missing keys are `Ok(None)`, never errors.
    async fn get(&self, path: &PathKey) -> Result<Option<Value>, AdapterError>;

    /// Fully replace the value at `path`.
    async fn set(&self, path: &PathKey, value: Value) -> Result<(), AdapterError>;

    /// Remove the value at `path` and, for tree-shaped backends, every
    /// descendant key under `path`.
    async fn delete(&self, path: &PathKey) -> Result<(), AdapterError>;

    async fn exists(&self, path: &PathKey) -> Result<bool, AdapterError> {
        Ok(self.get(path).await?.is_some())
    }

    /// All known keys starting with `prefix`. Order unspecified but stable
    /// enough for callers to sort.
    async fn list(&self, prefix: &PathKey) -> Result<Vec<PathKey>, AdapterError>;

    /// Linear scan over stored values matching `filter`.
    async fn query(&self, filter: &QueryFilter) -> Result<Vec<(PathKey, Value)>, AdapterError>;

    /// Register `subscriber` for changes at or under `path`. Subscriptions
    /// on the same path are independent of one another.
    async fn subscribe(
        &self,
        path: &PathKey,
        subscriber: Subscriber,
    ) -> Result<SubscriptionId, AdapterError>;

    /// Drop a subscription, releasing any poll/watch resource allocated for
    /// it. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), AdapterError>;

    /// Append `message` to the bounded history list for `channel`.
    async fn publish(&self, channel: &str, message: Value) -> Result<(), AdapterError> {
        let key = PathKey::parse(CHANNELS_PREFIX)?.join(&PathKey::parse(channel)?);
        let mut history = match self.get(&key).await? {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        };
        history.push(message);
        if history.len() > CHANNEL_HISTORY_CAP {
            let excess = history.len() - CHANNEL_HISTORY_CAP;
            history.drain(..excess);
        }
        self.set(&key, Value::Array(history)).await
    }

    /// Execute `ops` in order. Sequential, not atomic as a unit: a failure
    /// midway leaves prior operations applied.
    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), AdapterError> {
        for op in ops {
            match op {
                BatchOp::Set { path, value } => self.set(&path, value).await?,
                BatchOp::Delete { path } => self.delete(&path).await?,
            }
        }
        Ok(())
    }

    /// Force a persistence pass, where the backend has one.
    async fn save(&self) -> Result<(), AdapterError>;

    /// Re-read persisted state into the in-process cache.
    async fn load(&self) -> Result<(), AdapterError>;

    /// Drop all stored values.
    async fn clear(&self) -> Result<(), AdapterError>;

    /// Best-effort storage footprint, reported by `health`.
    async fn storage_usage(&self) -> StorageUsage {
        StorageUsage::default()
    }

    /// Round-trip probe: write, read back and delete a sentinel key,
    /// reporting latency. A timed-out or failed probe yields `Unhealthy`;
    /// it never propagates an error.
    async fn health(&self) -> HealthReport {
        let started = Instant::now();
        let budget = Duration::from_millis(PROBE_TIMEOUT_MS);

        let nonce = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let probe_key = match PathKey::parse(&format!("{}/probe-{}", PROBE_PREFIX, nonce)) {
            Ok(key) => key,
            Err(e) => return HealthReport::unhealthy(0, e.to_string()),
        };

        let round_trip = async {
            self.set(&probe_key, Value::from(nonce)).await?;
            let read_back = self.get(&probe_key).await?;
            self.delete(&probe_key).await?;
            if read_back != Some(Value::from(nonce)) {
                return Err(AdapterError::serialization(
                    &probe_key,
                    "probe read back a different value",
                ));
            }
            Ok::<(), AdapterError>(())
        };

        match tokio::time::timeout(budget, round_trip).await {
            Ok(Ok(())) => {
                let latency = started.elapsed().as_millis() as u64;
                HealthReport::healthy(latency, self.storage_usage().await)
            }
            Ok(Err(e)) => {
                let latency = started.elapsed().as_millis() as u64;
                HealthReport::unhealthy(latency, e.to_string())
            }
            Err(_) => HealthReport::unhealthy(
                PROBE_TIMEOUT_MS,
                AdapterError::Timeout {
                    millis: PROBE_TIMEOUT_MS,
                }
                .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_and_clauses() {
        let filter = QueryFilter::new()
            .field("status", "active")
            .field("kind", "agent");

        assert!(filter.matches(&json!({"status": "active", "kind": "agent", "extra": 1})));
        assert!(!filter.matches(&json!({"status": "active", "kind": "human"})));
        assert!(!filter.matches(&json!({"status": "active"})));
    }

    #[test]
    fn filter_rejects_non_objects() {
        let filter = QueryFilter::new().field("a", 1);
        assert!(!filter.matches(&json!("scalar")));
        assert!(!filter.matches(&json!([1, 2])));
    }

    #[test]
    fn empty_filter_matches_objects() {
        let filter = QueryFilter::new();
        assert!(filter.matches(&json!({})));
        assert!(filter.matches(&json!({"anything": true})));
    }
}
