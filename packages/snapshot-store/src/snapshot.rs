//! The snapshot adapter: a flat path→value map backed by one file.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use agentdeck_adapter::{
    nest, AdapterError, ChangeEvent, Durability, PathKey, QueryFilter, StorageAdapter,
    StorageUsage, Subscriber, SubscriptionId, Value,
};

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// The snapshot document. The whole flattened map is serialized here.
    pub path: PathBuf,
    /// How often the autosave task persists when the store is dirty.
    pub autosave_interval: Duration,
    /// Poll tick for subscriptions.
    pub poll_interval: Duration,
}

impl SnapshotConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            autosave_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

struct Inner {
    map: BTreeMap<String, Value>,
    dirty: bool,
    connected: bool,
}

#[derive(Default)]
struct Tasks {
    autosave: Option<JoinHandle<()>>,
    subscriptions: HashMap<SubscriptionId, JoinHandle<()>>,
}

/// Single-file snapshot store.
///
/// The internal representation is a flat `rendered key → value` map, not a
/// nested object: this keeps "a key holding an object" and "a key that is a
/// prefix of other keys" unambiguous. Writes acknowledge after the cache
/// update; persistence is deferred to the autosave task (`Durability::Deferred`).
///
/// Subscriptions are poll-driven: each one runs its own timer that re-reads
/// and re-notifies with the current value every tick, whether or not it
/// changed (at-least-once, not edge-triggered).
pub struct SnapshotStore {
    config: SnapshotConfig,
    inner: Arc<Mutex<Inner>>,
    tasks: Mutex<Tasks>,
    next_subscription: AtomicU64,
}

impl SnapshotStore {
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                map: BTreeMap::new(),
                dirty: false,
                connected: false,
            })),
            tasks: Mutex::new(Tasks::default()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Serialize the whole map to a temp file and atomically rename it over
    /// the target, so readers never observe a partially written snapshot.
    ///
    /// The dirty flag is cleared under the same lock that snapshots the map:
    /// a `set` racing with the file write re-marks dirty and is picked up by
    /// the next pass instead of being lost.
    async fn persist(path: &std::path::Path, inner: &Arc<Mutex<Inner>>) -> Result<(), AdapterError> {
        // Each persist writes its own temp file: an explicit `save` racing an
        // autosave tick must never share one, or a rename could promote the
        // other caller's partial write.
        static PERSIST_NONCE: AtomicU64 = AtomicU64::new(0);

        let serialized = {
            let mut inner = inner.lock().unwrap();
            inner.dirty = false;
            serde_json::to_string_pretty(&inner.map)
                .map_err(|e| AdapterError::serialization(path.display(), e))?
        };

        let tmp = path.with_extension(format!(
            "tmp{}",
            PERSIST_NONCE.fetch_add(1, Ordering::Relaxed)
        ));
        let result = async {
            tokio::fs::write(&tmp, serialized.as_bytes()).await?;
            tokio::fs::rename(&tmp, path).await?;
            Ok::<(), AdapterError>(())
        }
        .await;

        if result.is_err() {
            inner.lock().unwrap().dirty = true;
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result
    }

    fn spawn_autosave(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let path = self.config.path.clone();
        let interval = self.config.autosave_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick is immediate; skip it
            loop {
                ticker.tick().await;
                let dirty = inner.lock().unwrap().dirty;
                if !dirty {
                    continue;
                }
                if let Err(e) = Self::persist(&path, &inner).await {
                    log::warn!("snapshot autosave failed: {}", e);
                }
            }
        })
    }
}

impl Drop for SnapshotStore {
    fn drop(&mut self) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(handle) = tasks.autosave.take() {
            handle.abort();
        }
        for (_, handle) in tasks.subscriptions.drain() {
            handle.abort();
        }
    }
}

#[async_trait]
impl StorageAdapter for SnapshotStore {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn durability(&self) -> Durability {
        Durability::Deferred
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        if self.is_connected() {
            return Ok(());
        }

        if let Some(parent) = self.config.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AdapterError::connection(format!("cannot create snapshot directory: {}", e)))?;
        }

        self.load().await?;

        let mut tasks = self.tasks.lock().unwrap();
        tasks.autosave = Some(self.spawn_autosave());
        self.inner.lock().unwrap().connected = true;
        log::debug!("snapshot store connected at {}", self.config.path.display());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        // Stop the autosave task before the final save so the two cannot
        // interleave and skip a dirty flush at shutdown.
        let (autosave, subscriptions) = {
            let mut tasks = self.tasks.lock().unwrap();
            (
                tasks.autosave.take(),
                tasks.subscriptions.drain().collect::<Vec<_>>(),
            )
        };
        if let Some(handle) = autosave {
            handle.abort();
        }
        for (_, handle) in subscriptions {
            handle.abort();
        }

        let dirty = self.inner.lock().unwrap().dirty;
        if dirty {
            Self::persist(&self.config.path, &self.inner).await?;
        }

        self.inner.lock().unwrap().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    async fn get(&self, path: &PathKey) -> Result<Option<Value>, AdapterError> {
        let inner = self.inner.lock().unwrap();
        Ok(nest::assemble(&inner.map, path))
    }

    async fn set(&self, path: &PathKey, value: Value) -> Result<(), AdapterError> {
        let rendered = path.to_string();
        let mut inner = self.inner.lock().unwrap();

        // Keep the flat tree unambiguous: the key now holds a leaf, so any
        // stored strict descendants and any leaf stored at an ancestor go.
        let descendant_prefix = format!("{}/", rendered);
        inner
            .map
            .retain(|k, _| !k.starts_with(&descendant_prefix));
        let mut ancestor = path.parent();
        while let Some(a) = ancestor {
            inner.map.remove(&a.to_string());
            ancestor = a.parent();
        }

        inner.map.insert(rendered, value);
        inner.dirty = true;
        Ok(())
    }

    async fn delete(&self, path: &PathKey) -> Result<(), AdapterError> {
        let rendered = path.to_string();
        let mut inner = self.inner.lock().unwrap();
        if rendered.is_empty() {
            inner.map.clear();
        } else {
            let descendant_prefix = format!("{}/", rendered);
            inner
                .map
                .retain(|k, _| k != &rendered && !k.starts_with(&descendant_prefix));
        }
        inner.dirty = true;
        Ok(())
    }

    async fn list(&self, prefix: &PathKey) -> Result<Vec<PathKey>, AdapterError> {
        let rendered = prefix.to_string();
        let descendant_prefix = format!("{}/", rendered);
        let inner = self.inner.lock().unwrap();

        let mut keys = Vec::new();
        for k in inner.map.keys() {
            if rendered.is_empty() || k == &rendered || k.starts_with(&descendant_prefix) {
                keys.push(PathKey::parse(k)?);
            }
        }
        Ok(keys)
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<(PathKey, Value)>, AdapterError> {
        let inner = self.inner.lock().unwrap();
        let mut matches = Vec::new();
        for (k, v) in &inner.map {
            if filter.matches(v) {
                matches.push((PathKey::parse(k)?, v.clone()));
            }
        }
        Ok(matches)
    }

    async fn subscribe(
        &self,
        path: &PathKey,
        subscriber: Subscriber,
    ) -> Result<SubscriptionId, AdapterError> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let inner = self.inner.clone();
        let path = path.clone();
        let interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let value = {
                    let inner = inner.lock().unwrap();
                    nest::assemble(&inner.map, &path)
                };
                subscriber(ChangeEvent {
                    path: path.clone(),
                    value,
                });
            }
        });

        self.tasks.lock().unwrap().subscriptions.insert(id, handle);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), AdapterError> {
        if let Some(handle) = self.tasks.lock().unwrap().subscriptions.remove(&id) {
            handle.abort();
        }
        Ok(())
    }

    async fn save(&self) -> Result<(), AdapterError> {
        Self::persist(&self.config.path, &self.inner).await
    }

    async fn load(&self) -> Result<(), AdapterError> {
        let bytes = match tokio::fs::read(&self.config.path).await {
            Ok(bytes) => bytes,
            // A missing snapshot is a fresh store, not an error.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let map: BTreeMap<String, Value> = serde_json::from_slice(&bytes)
            .map_err(|e| AdapterError::serialization(self.config.path.display(), e))?;

        let mut inner = self.inner.lock().unwrap();
        inner.map = map;
        inner.dirty = false;
        Ok(())
    }

    async fn clear(&self) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.dirty = true;
        Ok(())
    }

    async fn storage_usage(&self) -> StorageUsage {
        let used_bytes = tokio::fs::metadata(&self.config.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        StorageUsage {
            used_bytes,
            available_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdeck_adapter::key;
    use serde_json::json;

    fn scratch_store(dir: &tempfile::TempDir) -> SnapshotStore {
        SnapshotStore::new(SnapshotConfig::new(dir.path().join("deck.json")))
    }

    #[tokio::test]
    async fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        store
            .set(&key!("agents/worker-3"), json!({"status": "idle"}))
            .await
            .unwrap();

        let value = store.get(&key!("agents/worker-3")).await.unwrap();
        assert_eq!(value, Some(json!({"status": "idle"})));

        assert_eq!(store.get(&key!("agents/missing")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn interior_prefix_assembles_nested_view() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        store.set(&key!("agents/a"), json!("idle")).await.unwrap();
        store.set(&key!("agents/b"), json!("busy")).await.unwrap();

        let value = store.get(&key!("agents")).await.unwrap();
        assert_eq!(value, Some(json!({"a": "idle", "b": "busy"})));
    }

    #[tokio::test]
    async fn delete_cascades_to_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        store.set(&key!("rooms/a/title"), json!("A")).await.unwrap();
        store.set(&key!("rooms/a/count"), json!(2)).await.unwrap();
        store.set(&key!("rooms/b"), json!("keep")).await.unwrap();

        store.delete(&key!("rooms/a")).await.unwrap();

        assert!(!store.exists(&key!("rooms/a")).await.unwrap());
        assert!(!store.exists(&key!("rooms/a/title")).await.unwrap());
        assert!(store.exists(&key!("rooms/b")).await.unwrap());
    }

    #[tokio::test]
    async fn set_removes_conflicting_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        store.set(&key!("a/b/c"), json!(1)).await.unwrap();
        store.set(&key!("a/b"), json!("leaf")).await.unwrap();

        // The descendant was dropped; the leaf wins.
        assert_eq!(store.get(&key!("a/b")).await.unwrap(), Some(json!("leaf")));
        let keys = store.list(&PathKey::root()).await.unwrap();
        assert_eq!(keys, vec![key!("a/b")]);
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        store.set(&key!("agents/a"), json!(1)).await.unwrap();
        store.set(&key!("agents/b"), json!(2)).await.unwrap();
        store.set(&key!("rooms/x"), json!(3)).await.unwrap();

        let mut keys = store.list(&key!("agents")).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![key!("agents/a"), key!("agents/b")]);

        // `agents` must not match `agentsmith`
        store.set(&key!("agentsmith"), json!(4)).await.unwrap();
        let keys = store.list(&key!("agents")).await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn query_matches_field_equality() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        store
            .set(&key!("agents/a"), json!({"status": "idle", "load": 1}))
            .await
            .unwrap();
        store
            .set(&key!("agents/b"), json!({"status": "busy", "load": 1}))
            .await
            .unwrap();

        let filter = QueryFilter::new().field("status", "idle");
        let results = store.query(&filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, key!("agents/a"));
    }

    #[tokio::test]
    async fn publish_trims_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        for i in 0..agentdeck_adapter::CHANNEL_HISTORY_CAP + 5 {
            store.publish("alerts", json!(i)).await.unwrap();
        }

        let history = store.get(&key!("channels/alerts")).await.unwrap().unwrap();
        let entries = history.as_array().unwrap();
        assert_eq!(entries.len(), agentdeck_adapter::CHANNEL_HISTORY_CAP);
        assert_eq!(entries[0], json!(5));
    }

    #[tokio::test]
    async fn concurrent_saves_keep_the_snapshot_complete() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        for i in 0..10 {
            store
                .set(&key!(&format!("agents/{}", i)), json!(i))
                .await
                .unwrap();
        }

        let (a, b, c) = tokio::join!(store.save(), store.save(), store.save());
        a.unwrap();
        b.unwrap();
        c.unwrap();

        // Whatever the interleaving, the target is a complete document.
        let raw = std::fs::read_to_string(dir.path().join("deck.json")).unwrap();
        let map: BTreeMap<String, Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(map.len(), 10);
    }

    #[tokio::test]
    async fn health_probe_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        let report = store.health().await;
        assert!(report.error.is_none(), "{:?}", report.error);
        // The probe cleans up after itself.
        assert!(store.list(&key!("_health")).await.unwrap().is_empty());
    }
}
